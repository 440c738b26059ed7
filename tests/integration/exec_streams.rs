use std::{io::Cursor, time::Duration};

use nssh::{RemoteExit, SessionRequest, run_session};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::common::{password_chain, start_server};

/// This test ensures that standard input is streamed to the remote command,
/// that local EOF reaches it, and that output arrives complete.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn exec_streams_stdin_until_eof() {
    let (server, _server) = start_server().await;
    let chain = password_chain(server, &["first", "second"]).await;
    let mut payload = vec![0u8; 256 * 1024];
    ChaCha20Rng::seed_from_u64(42).fill_bytes(&mut payload);

    let channel = chain.terminal().open_session().await.unwrap();
    let (mut stdout, mut stderr) = (Vec::<u8>::new(), Vec::<u8>::new());
    let exit = run_session(
        channel,
        SessionRequest {
            command: Some("cat".into()),
            pty: None,
        },
        Cursor::new(payload.clone()),
        &mut stdout,
        &mut stderr,
        None,
    )
    .await
    .expect("session should finish");
    assert_eq!(exit, RemoteExit::Code(0));
    assert_eq!(stdout.len(), payload.len());
    assert!(stdout == payload, "output differs from input");
    assert!(stderr.is_empty());
    chain.close().await;
}

/// This test ensures that input larger than the channel window keeps flowing
/// while the remote command echoes it back.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn exec_streams_input_larger_than_window() {
    let (server, _server) = start_server().await;
    let chain = password_chain(server, &["first", "second"]).await;
    let mut payload = vec![0u8; 4 * 1024 * 1024];
    ChaCha20Rng::seed_from_u64(1337).fill_bytes(&mut payload);

    let channel = chain.terminal().open_session().await.unwrap();
    let (mut stdout, mut stderr) = (Vec::<u8>::new(), Vec::<u8>::new());
    let exit = tokio::time::timeout(
        Duration::from_secs(30),
        run_session(
            channel,
            SessionRequest {
                command: Some("cat".into()),
                pty: None,
            },
            Cursor::new(payload.clone()),
            &mut stdout,
            &mut stderr,
            None,
        ),
    )
    .await
    .expect("session stalled")
    .expect("session should finish");
    assert_eq!(exit, RemoteExit::Code(0));
    assert_eq!(stdout.len(), payload.len());
    assert!(stdout == payload, "output differs from input");
    chain.close().await;
}

/// This test ensures that extended data is written to standard error.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn exec_streams_stderr() {
    let (server, _server) = start_server().await;
    let chain = password_chain(server, &["user"]).await;
    let channel = chain.terminal().open_session().await.unwrap();
    let (mut stdout, mut stderr) = (Vec::<u8>::new(), Vec::<u8>::new());
    let exit = run_session(
        channel,
        SessionRequest {
            command: Some("warn disk almost full".into()),
            pty: None,
        },
        tokio::io::empty(),
        &mut stdout,
        &mut stderr,
        None,
    )
    .await
    .unwrap();
    assert_eq!(exit, RemoteExit::Code(0));
    assert!(stdout.is_empty());
    assert_eq!(String::from_utf8(stderr).unwrap(), "disk almost full\n");
    chain.close().await;
}
