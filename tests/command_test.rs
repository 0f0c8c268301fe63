mod common;

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use switchboard::{
    config::{CommandConfig, SwitchboardConfig},
    event::command::{CommandError, Commands},
    mode::RuntimeMode,
    Registry,
};
use tokio::sync::mpsc;

#[derive(Debug, Serialize, Deserialize)]
struct Login {
    username: String,
    password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct LoginResponse {
    is_valid: bool,
    message: String,
}

async fn authenticate(login: Login) -> LoginResponse {
    tokio::time::sleep(Duration::from_millis(10)).await;
    LoginResponse {
        is_valid: login.password == "foo",
        message: format!("checked {}", login.username),
    }
}

#[tokio::test]
async fn test_actor_and_caller_on_separate_handles() {
    let registry = Arc::new(Registry::new());
    let server = Commands::new(&registry).unwrap();
    let client = Commands::new(&registry).unwrap();
    server.add_command("login", authenticate).unwrap();

    let ok = client
        .run_command::<_, LoginResponse>(
            "login",
            Login {
                username: "admin".to_string(),
                password: "foo".to_string(),
            },
        )
        .await
        .unwrap();
    let rejected = client
        .run_command::<_, LoginResponse>(
            "login",
            Login {
                username: "guest".to_string(),
                password: "bar".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(ok.command_sequence_id, 1);
    assert!(ok.is_valid);
    assert_eq!(ok.message, "checked admin");
    assert_eq!(rejected.command_sequence_id, 2);
    assert!(!rejected.is_valid);
    assert_eq!(client.bus().subscriber_count(), 1);
}

#[tokio::test]
async fn test_commands_share_one_sequence() {
    let commands = Commands::new(&Registry::new()).unwrap();
    commands
        .add_command("double", |n: u64| async move { n * 2 })
        .unwrap();
    commands
        .add_command("echo", |s: String| async move { s })
        .unwrap();

    let a = commands.run_command::<_, u64>("double", 21).await.unwrap();
    let b = commands.command("echo", "fire").unwrap();
    let c = commands
        .run_command::<_, String>("echo", "hi")
        .await
        .unwrap();

    assert_eq!((a.command_sequence_id, a.payload), (1, 42));
    assert_eq!(b, 2);
    assert_eq!((c.command_sequence_id, c.payload.as_str()), (3, "hi"));
}

#[tokio::test]
async fn test_command_with_response_delivers_to_callback() {
    let commands = Commands::new(&Registry::new()).unwrap();
    commands
        .add_command("double", |n: u64| async move { n * 2 })
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for n in 1..=3u64 {
        let tx = tx.clone();
        commands
            .command_with_response::<_, u64, _>("double", n, move |response| {
                let _ = tx.send((response.command_sequence_id, response.payload));
            })
            .unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(rx.recv().await.unwrap());
    }
    received.sort();
    assert_eq!(received, vec![(1, 2), (2, 4), (3, 6)]);
}

#[tokio::test]
async fn test_configured_timeout() {
    let registry = Arc::new(Registry::new());
    let config = SwitchboardConfig {
        mode: RuntimeMode::Development,
        command: CommandConfig {
            timeout: Some(Duration::from_millis(20)),
        },
        ..Default::default()
    };
    config.apply(&registry).unwrap();

    let commands = Commands::with_config(&registry, &config.command).unwrap();
    let result = commands.run_command::<_, ()>("nobody", ()).await;

    assert!(matches!(
        result,
        Err(CommandError::Timeout { sequence_id: 1, .. })
    ));
    assert_eq!(commands.bus().subscriber_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_sequence_ids_are_one_to_n(calls in 1usize..20) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ids = runtime.block_on(async {
            let commands = Commands::new(&Registry::new()).unwrap();
            commands.add_command("id", |_: ()| async {}).unwrap();
            let mut ids = Vec::new();
            for _ in 0..calls {
                let response = commands.run_command::<_, ()>("id", ()).await.unwrap();
                ids.push(response.command_sequence_id);
            }
            ids
        });
        let expected: Vec<u64> = (1..=calls as u64).collect();
        prop_assert_eq!(ids, expected);
    }
}
