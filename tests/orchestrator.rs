mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use common::{eventually, Call, RecordingRegistry};
use kittycaster::config::Config;
use kittycaster::media::MediaRef;
use kittycaster::orchestrator::{Orchestrator, RunState};
use kittycaster::Action;
use tokio::sync::mpsc;

fn config_for(dir: &tempfile::TempDir) -> Config {
    Config {
        friendly_name: "TV".to_string(),
        discovery_timeout: 1,
        serve_local_folder: Some(dir.path().to_path_buf()),
        serve_port: 0,
        serve_host: Some("127.0.0.1".to_string()),
        ..Config::default()
    }
}

#[tokio::test]
async fn start_with_missing_file_still_plays_synthesized_url() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();
    let registry = RecordingRegistry::with_devices(&["TV"]);

    let orchestrator = Orchestrator::start(config_for(&dir), Arc::new(registry.clone()))
        .await
        .unwrap();
    assert_eq!(orchestrator.state(), RunState::Running);
    let port = orchestrator.server().unwrap().port();
    let caster = Arc::clone(orchestrator.caster());
    assert_eq!(caster.catalog().list(), vec![MediaRef::Local("a.mp4".to_string())]);

    let (tx, rx) = mpsc::unbounded_channel();
    let expected = format!("http://127.0.0.1:{}/foo.mp4", port);
    let driver = async {
        tx.send("start foo.mp4".to_string()).unwrap();
        assert!(eventually(Duration::from_secs(5), || caster.devices().contains("TV")).await);
        tx.send("q".to_string()).unwrap();
    };
    let (state, ()) = tokio::join!(orchestrator.run(rx, std::future::pending::<()>()), driver);

    assert_eq!(state, RunState::Stopped);
    assert_eq!(registry.loads(), vec![expected]);
    // Missing files are not added to the catalog.
    assert_eq!(caster.catalog().len(), 1);
    assert!(caster.devices().is_empty());
    assert_eq!(
        registry.calls().last(),
        Some(&Call::Quit {
            device: "TV".to_string(),
            stopped: 1
        })
    );
}

#[tokio::test]
async fn random_start_picks_from_scanned_folder() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("only.webm"), b"w").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"t").unwrap();
    let registry = RecordingRegistry::with_devices(&["TV"]);

    let orchestrator = Orchestrator::start(config_for(&dir), Arc::new(registry.clone()))
        .await
        .unwrap();
    let port = orchestrator.server().unwrap().port();
    let caster = Arc::clone(orchestrator.caster());

    let (tx, rx) = mpsc::unbounded_channel();
    let driver = async {
        tx.send("bogus".to_string()).unwrap();
        tx.send("start".to_string()).unwrap();
        assert!(eventually(Duration::from_secs(5), || caster.devices().contains("TV")).await);
        tx.send("stop".to_string()).unwrap();
        assert!(eventually(Duration::from_secs(5), || caster.devices().is_empty()).await);
        drop(tx);
    };
    let (state, ()) = tokio::join!(orchestrator.run(rx, std::future::pending::<()>()), driver);

    assert_eq!(state, RunState::Stopped);
    assert_eq!(registry.loads(), vec![format!("http://127.0.0.1:{}/only.webm", port)]);
    // Stopped by the command, so shutdown had nothing left to stop.
    assert_eq!(registry.quits().len(), 1);
    assert!(caster.devices().is_empty());
}

#[tokio::test]
async fn shutdown_signal_drains_and_releases_port() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RecordingRegistry::with_devices(&["TV"]);
    let orchestrator = Orchestrator::start(config_for(&dir), Arc::new(registry.clone()))
        .await
        .unwrap();
    let port = orchestrator.server().unwrap().port();

    let (_tx, rx) = mpsc::unbounded_channel::<String>();
    let signal = tokio::time::sleep(Duration::from_millis(100));
    let state = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(rx, signal))
        .await
        .unwrap();

    assert_eq!(state, RunState::Stopped);
    assert!(registry.calls().is_empty());
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn port_in_use_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let mut config = config_for(&dir);
    config.serve_port = taken.local_addr().unwrap().port();

    let result = Orchestrator::start(config, Arc::new(RecordingRegistry::default())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn schedule_entries_are_registered_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir);
    config.schedule = Config::from_toml(
        r#"
        [[schedule]]
        time = "08:00"
        action = "start"

        [[schedule]]
        time = "late"
        action = "stop"
        "#,
    )
    .unwrap()
    .schedule;

    let orchestrator = Orchestrator::start(config, Arc::new(RecordingRegistry::default()))
        .await
        .unwrap();
    let jobs = orchestrator.scheduler().list();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].device, "TV");
    orchestrator.shutdown(true).await;
}

#[tokio::test]
async fn quit_while_launching_still_stops_the_receiver() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RecordingRegistry::with_devices(&["TV"]).with_launch_delay(Duration::from_millis(300));
    let orchestrator = Orchestrator::start(config_for(&dir), Arc::new(registry.clone()))
        .await
        .unwrap();
    let port = orchestrator.server().unwrap().port();
    let caster = Arc::clone(orchestrator.caster());

    let (tx, rx) = mpsc::unbounded_channel();
    let driver = async {
        tx.send("start a.mp4".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send("q".to_string()).unwrap();
    };
    let (state, ()) = tokio::join!(orchestrator.run(rx, std::future::pending::<()>()), driver);

    assert_eq!(state, RunState::Stopped);
    assert_eq!(registry.loads(), vec![format!("http://127.0.0.1:{}/a.mp4", port)]);
    assert_eq!(
        registry.calls().last(),
        Some(&Call::Quit {
            device: "TV".to_string(),
            stopped: 1
        })
    );
    assert!(caster.devices().is_empty());
}

#[tokio::test]
async fn schedule_command_adds_a_daily_pair() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = Orchestrator::start(config_for(&dir), Arc::new(RecordingRegistry::default()))
        .await
        .unwrap();
    assert!(orchestrator.scheduler().is_empty());

    assert!(orchestrator.handle_line("schedule 07:00 07:30 a.mp4 0.2"));
    assert!(orchestrator.handle_line("schedule 07:00 nope"));

    let jobs = orchestrator.scheduler().list();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].device, "TV");
    assert_eq!(jobs[0].action, Action::Start);
    assert_eq!(jobs[0].media, Some(MediaRef::Local("a.mp4".to_string())));
    assert_eq!(jobs[0].time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    assert!((jobs[0].volume - 0.2).abs() < f32::EPSILON);
    assert_eq!(jobs[1].action, Action::Stop);
    assert_eq!(jobs[1].media, None);
    assert_eq!(jobs[1].time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());

    orchestrator.shutdown(true).await;
}
