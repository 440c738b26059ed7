use nssh::{ParseOutcome, entrypoint, error::ChainError, parse_args};

use crate::common::{REJECTED_USER, client_key_file, start_server};

fn plan(args: &[String]) -> nssh::HopPlan {
    match parse_args(args) {
        Ok(ParseOutcome::Run(plan)) => plan,
        other => panic!("unexpected parse result: {other:?}"),
    }
}

/// This test ensures that a failing hop aborts the program with an error that
/// names the hop, after the earlier hops authenticated with the key file.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn entrypoint_exit_code_on_chain_failure() {
    let (server, _server) = start_server().await;
    let key = client_key_file("entrypoint-chain-failure");
    let args = vec![
        "-i".to_string(),
        key.display().to_string(),
        format!("first@{server}"),
        format!("{REJECTED_USER}@{server}"),
        "exit".to_string(),
        "5".to_string(),
    ];
    let report = entrypoint(plan(&args)).await.unwrap_err();
    std::fs::remove_file(key).unwrap();
    let error = report
        .downcast_ref::<ChainError>()
        .expect("error should come from the chain");
    assert_eq!(error.hop_index(), Some(1));
}

/// This test ensures that forwarding mode substitutes the local address into
/// the local command and returns that command's exit code.
#[cfg(unix)]
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn entrypoint_exit_code_of_local_command() {
    let (server, _server) = start_server().await;
    let key = client_key_file("entrypoint-local-command");
    let args = vec![
        "-i".to_string(),
        key.display().to_string(),
        "--run_local_fwd".to_string(),
        "127.0.0.1:9".to_string(),
        format!("user@{server}"),
        "sh".to_string(),
        "-c".to_string(),
        "case {{fwd}} in 127.0.0.1:*) exit 4;; *) exit 1;; esac".to_string(),
    ];
    let code = entrypoint(plan(&args)).await.expect("program should run");
    std::fs::remove_file(key).unwrap();
    assert_eq!(code, 4);
}
