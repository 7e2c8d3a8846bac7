use decoder_actor::{DecoderActor, DecoderConfig, DecoderError, DecoderExit};
use tokio::sync::{mpsc, watch};

#[test]
fn default_command_emits_json() {
    let config = DecoderConfig::default();
    assert_eq!(config.binary, "rtl_433");
    assert_eq!(
        config.command_args(),
        vec!["-F", "json", "-M", "time:iso:usec"]
    );
}

#[test]
fn protocol_params_come_before_advanced_params() {
    let config = DecoderConfig {
        binary: "rtl_433".to_string(),
        protocol_params: " -R 40   -R 41 ".to_string(),
        advanced_params: "-f 868M\t-s 1024k".to_string(),
        ..DecoderConfig::default()
    };
    assert_eq!(
        config.command_args(),
        vec![
            "-F", "json", "-M", "time:iso:usec", "-R", "40", "-R", "41", "-f", "868M", "-s",
            "1024k"
        ]
    );
    assert_eq!(
        config.command_line(),
        "rtl_433 -F json -M time:iso:usec -R 40 -R 41 -f 868M -s 1024k"
    );
}

#[tokio::test]
async fn missing_binary_fails_to_spawn() {
    let (tx, _rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DecoderConfig {
        binary: "/nonexistent/rtl_433".to_string(),
        ..DecoderConfig::default()
    };

    let result = DecoderActor::new(config, tx, shutdown_rx).run().await;
    assert!(matches!(result, Err(DecoderError::Spawn { .. })));
}

#[tokio::test]
async fn shutdown_before_start_skips_spawn() {
    let (tx, _rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(true);
    let config = DecoderConfig {
        binary: "/nonexistent/rtl_433".to_string(),
        ..DecoderConfig::default()
    };

    let result = DecoderActor::new(config, tx, shutdown_rx).run().await;
    assert!(matches!(result, Ok(DecoderExit::Shutdown)));
}

#[cfg(unix)]
#[tokio::test]
async fn forwards_stdout_lines_until_exit() {
    let (tx, mut rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DecoderConfig {
        binary: "echo".to_string(),
        protocol_params: "-R 40".to_string(),
        ..DecoderConfig::default()
    };

    let exit = DecoderActor::new(config, tx, shutdown_rx)
        .run()
        .await
        .expect("run");
    match exit {
        DecoderExit::StreamClosed(status) => assert!(status.success()),
        other => panic!("unexpected exit: {other:?}"),
    }

    assert_eq!(
        rx.recv().await.as_deref(),
        Some("-F json -M time:iso:usec -R 40")
    );
    assert!(rx.recv().await.is_none());
}
