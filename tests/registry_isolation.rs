//! Many calls at once: audio never crosses between sessions and the
//! registry stays consistent under concurrent registration and re-keying.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use tokio::sync::mpsc;

use callbridge_gateway::core::audio::ConsentAssets;
use callbridge_gateway::core::session::{Phase, SessionHandle, SessionRegistry, SessionStatus};

use support::{CallerLeg, MockConnector, ModelPeer, context, settings, standard_tools};

const CALLS: usize = 16;
const FRAMES: usize = 25;

/// Collect `FRAMES` caller appends and return the fill byte they carry.
async fn appended_tag(peer: &mut ModelPeer) -> u8 {
    let mut tags = HashSet::new();
    let mut seen = 0;
    while seen < FRAMES {
        let event = peer.next_any().await;
        if event["type"] != "input_audio_buffer.append" {
            continue;
        }
        let audio = BASE64_STANDARD
            .decode(event["audio"].as_str().unwrap())
            .unwrap();
        tags.extend(audio);
        seen += 1;
    }
    assert_eq!(tags.len(), 1, "one model leg received audio from several calls");
    tags.into_iter().next().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_do_not_mix_audio() {
    let (connector, mut peers) = MockConnector::new();
    let ctx = context(
        settings(true),
        standard_tools(),
        ConsentAssets::default(),
        connector,
    );

    let callers: Vec<CallerLeg> = (0..CALLS).map(|_| CallerLeg::connect(ctx.clone())).collect();
    let mut model_peers = Vec::with_capacity(CALLS);
    for _ in 0..CALLS {
        let peer = tokio::time::timeout(Duration::from_secs(30), peers.recv())
            .await
            .expect("model leg never opened")
            .unwrap();
        model_peers.push(peer);
    }

    for (i, caller) in callers.iter().enumerate() {
        caller.start(&format!("MZ-{i}")).await;
    }
    // every leg is configured, so caller audio is forwarded from here on
    for peer in &mut model_peers {
        assert_eq!(peer.next().await["type"], "session.update");
    }

    let senders: Vec<_> = callers
        .iter()
        .enumerate()
        .map(|(i, caller)| {
            let events = caller.events.clone();
            tokio::spawn(async move {
                for frame in 0..FRAMES {
                    let event = callbridge_gateway::core::telephony::TelephonyEvent::parse(
                        &serde_json::json!({
                            "event": "media",
                            "media": {
                                "timestamp": ((frame as u64 + 1) * 20).to_string(),
                                "payload": BASE64_STANDARD.encode([i as u8; 160]),
                            }
                        })
                        .to_string(),
                    )
                    .unwrap();
                    events.send(event).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    let mut tags = HashSet::new();
    for peer in &mut model_peers {
        tags.insert(appended_tag(peer).await);
    }
    assert_eq!(tags, (0..CALLS as u8).collect::<HashSet<_>>());

    assert_eq!(ctx.registry.len(), CALLS);
    for i in 0..CALLS {
        let handle = ctx.registry.get(&format!("MZ-{i}")).expect("session re-keyed");
        assert_eq!(handle.status().phase, Phase::ConsentPending);
    }

    for caller in callers {
        drop(caller.events);
        tokio::time::timeout(Duration::from_secs(10), caller.task)
            .await
            .expect("session did not end")
            .unwrap();
    }
    assert!(ctx.registry.is_empty());
    assert!(model_peers.iter().all(ModelPeer::is_closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_migrate() {
    let registry = SessionRegistry::new();

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let handle = Arc::new(SessionHandle::new(tx, SessionStatus::new(Phase::Active)));
                let pending = registry.create_pending(handle.clone());
                assert!(registry.get(&pending).is_some());
                tokio::task::yield_now().await;

                let key = format!("MZ-{i}");
                assert!(registry.migrate(&pending, &key));
                assert!(registry.get(&pending).is_none());
                assert!(Arc::ptr_eq(&registry.get(&key).unwrap(), &handle));
                (key, handle)
            })
        })
        .collect();

    let mut entries = Vec::new();
    for task in tasks {
        entries.push(task.await.unwrap());
    }
    assert_eq!(registry.len(), 64);
    assert!(registry.list().iter().all(|row| row.key.starts_with("MZ-")));

    for (key, handle) in &entries {
        assert!(registry.release(key, handle));
    }
    assert!(registry.is_empty());
}
