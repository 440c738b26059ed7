use nssh::{PtyRequest, SessionRequest, error::SessionError, run_session};

use crate::common::{NO_PTY_USER, password_chain, start_server};

/// This test ensures that a refused pty request ends the session with an error
/// before any shell is started.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn shell_pty_rejected() {
    let (server, _server) = start_server().await;
    let chain = password_chain(server, &["first", NO_PTY_USER]).await;
    let channel = chain.terminal().open_session().await.unwrap();
    let mut stdout = Vec::<u8>::new();
    let result = run_session(
        channel,
        SessionRequest {
            command: None,
            pty: Some(PtyRequest {
                term: "xterm".into(),
                cols: 80,
                rows: 24,
            }),
        },
        tokio::io::empty(),
        &mut stdout,
        &mut tokio::io::sink(),
        None,
    )
    .await;
    assert!(matches!(result, Err(SessionError::PtyRejected)));
    assert!(stdout.is_empty());
    chain.close().await;
}
