//! Hexlink 分发集成测试
//!
//! 在内存传输上运行完整会话，验证编解码、分发与一次性等待的配合。

#[cfg(test)]
mod request_tests {
    use hexlink_codec::{Packet, PacketRegistry, ProtoCodec};
    use hexlink_config::SessionConfig;
    use hexlink_core::SessionId;
    use hexlink_dispatch::{Dispatcher, Scheduler};
    use hexlink_network::{MemoryTransport, Session};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(uint64, tag = "1")]
        nonce: u64,
    }

    impl Packet for Ping {
        const PACKET_ID: u16 = 1;
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct Pong {
        #[prost(uint64, tag = "1")]
        nonce: u64,
    }

    impl Packet for Pong {
        const PACKET_ID: u16 = 2;
    }

    fn dispatcher() -> Dispatcher {
        let registry = PacketRegistry::new()
            .with::<Ping>()
            .and_then(|r| r.with::<Pong>())
            .unwrap();
        Dispatcher::new(ProtoCodec::new(registry))
    }

    /// 建立一对相连的会话，服务端对 Ping 回应同样 nonce 的 Pong
    fn connected_pair() -> (Dispatcher, Arc<Session>, Dispatcher, Arc<Session>) {
        let (a, b) = MemoryTransport::pair(4096);

        let server = dispatcher();
        server.add_handler::<Ping, _>(
            |dispatcher: &Dispatcher, session: &Arc<Session>, ping: Arc<Ping>| {
                dispatcher.send(session, &Pong { nonce: ping.nonce });
                Ok(())
            },
            Scheduler::Inline,
        );
        let server_session = Session::new(SessionId::new(1), Arc::new(a), SessionConfig::default());
        server_session.start(Arc::new(server.clone()));

        let client = dispatcher();
        let client_session = Session::new(SessionId::new(1), Arc::new(b), SessionConfig::default());
        client_session.start(Arc::new(client.clone()));

        (server, server_session, client, client_session)
    }

    #[tokio::test]
    async fn test_send_and_listen_once_round_trip() {
        let (_server, _server_session, client, session) = connected_pair();
        let cancel = CancellationToken::new();

        let pong = tokio::time::timeout(
            Duration::from_secs(2),
            client.send_and_listen_once::<Ping, Pong>(&session, &Ping { nonce: 42 }, &cancel),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(pong.nonce, 42);
        assert_eq!(client.handler_count::<Pong>(), 0);
    }

    #[tokio::test]
    async fn test_second_request_does_not_see_stale_reply() {
        let (_server, _server_session, client, session) = connected_pair();
        let cancel = CancellationToken::new();

        let first = client
            .send_and_listen_once::<Ping, Pong>(&session, &Ping { nonce: 1 }, &cancel)
            .await
            .unwrap();
        assert_eq!(first.nonce, 1);

        let second = client
            .send_and_listen_once::<Ping, Pong>(&session, &Ping { nonce: 2 }, &cancel)
            .await
            .unwrap();
        assert_eq!(second.nonce, 2);
    }

    #[tokio::test]
    async fn test_cancelled_wait_cleans_up_handler() {
        let (a, _b) = MemoryTransport::pair(4096);
        let client = dispatcher();
        let session = Session::new(SessionId::new(7), Arc::new(a), SessionConfig::default());
        let before = client.handler_count::<Pong>();

        let cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let client = client.clone();
            let session = session.clone();
            let cancel = cancel.clone();
            async move { client.handle_once::<Pong>(&session, &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.handler_count::<Pong>(), before + 1);

        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
        assert_eq!(client.handler_count::<Pong>(), before);

        // 取消之后到达的消息不再影响任何等待
        client.dispatch_message(&session, Pong { nonce: 5 }).unwrap();
        assert_eq!(client.handler_count::<Pong>(), before);
    }

    #[tokio::test]
    async fn test_remote_close_ends_pending_request() {
        let (a, b) = MemoryTransport::pair(4096);
        let client = dispatcher();
        let session = Session::new(SessionId::new(3), Arc::new(a), SessionConfig::default());
        session.start(Arc::new(client.clone()));

        // 对端直接断开
        drop(b);

        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            client.send_and_listen_once::<Ping, Pong>(&session, &Ping { nonce: 9 }, &cancel),
        )
        .await
        .unwrap();
        assert!(result.is_none());
        assert_eq!(client.handler_count::<Pong>(), 0);
    }
}

#[cfg(test)]
mod persistent_handler_tests {
    use hexlink_codec::{Packet, PacketRegistry, ProtoCodec};
    use hexlink_config::SessionConfig;
    use hexlink_core::SessionId;
    use hexlink_dispatch::{Dispatcher, Scheduler};
    use hexlink_network::{MemoryTransport, Session};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Score {
        #[prost(uint64, tag = "1")]
        points: u64,
    }

    impl Packet for Score {
        const PACKET_ID: u16 = 10;
    }

    #[tokio::test]
    async fn test_messages_flow_to_persistent_handler_in_order() {
        let registry = PacketRegistry::new().with::<Score>().unwrap();
        let receiver = Dispatcher::new(ProtoCodec::new(registry.clone()));
        let sender = Dispatcher::new(ProtoCodec::new(registry));

        let total = Arc::new(AtomicU64::new(0));
        let last = Arc::new(AtomicU64::new(0));
        {
            let total = total.clone();
            let last = last.clone();
            receiver.add_handler::<Score, _>(
                move |_: &Dispatcher, _: &Arc<Session>, score: Arc<Score>| {
                    assert!(score.points > last.swap(score.points, Ordering::SeqCst));
                    total.fetch_add(score.points, Ordering::SeqCst);
                    Ok(())
                },
                Scheduler::Inline,
            );
        }

        let (a, b) = MemoryTransport::pair(64);
        let inbound = Session::new(SessionId::new(1), Arc::new(a), SessionConfig::default());
        inbound.start(Arc::new(receiver));
        let outbound = Session::new(SessionId::new(1), Arc::new(b), SessionConfig::default());
        outbound.start(Arc::new(sender.clone()));

        for points in 1..=10 {
            assert!(sender.send(&outbound, &Score { points }));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while total.load(Ordering::SeqCst) < 55 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 10);
    }
}

#[cfg(test)]
mod prefix_tests {
    use hexlink_codec::{Packet, PacketRegistry, ProtoCodec};
    use hexlink_config::SessionConfig;
    use hexlink_core::SessionId;
    use hexlink_dispatch::{Dispatcher, Envelope, Scheduler};
    use hexlink_network::{DeliveryClass, MemoryTransport, Session};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Relay {
        #[prost(string, tag = "1")]
        body: String,
    }

    impl Packet for Relay {
        const PACKET_ID: u16 = 20;
    }

    #[tokio::test]
    async fn test_prefixes_round_trip_through_sessions() {
        let registry = PacketRegistry::new().with::<Relay>().unwrap();

        // 网关：把收到的前缀原样带回，并在末尾追加自己的路由号
        let gateway = Dispatcher::new(ProtoCodec::new(registry.clone()));
        gateway.add_envelope_handler::<Relay, _>(
            |dispatcher: &Dispatcher, session: &Arc<Session>, envelope: Envelope<Relay>| {
                let mut prefixes = envelope.prefixes().to_vec();
                prefixes.push(900);
                dispatcher.send_with_prefixes(
                    session,
                    envelope.message().as_ref(),
                    &prefixes,
                    DeliveryClass::Retained,
                );
                Ok(())
            },
            Scheduler::Inline,
        );

        let origin = Dispatcher::new(ProtoCodec::new(registry));
        let (tx, mut rx) = mpsc::unbounded_channel();
        origin.add_envelope_handler::<Relay, _>(
            move |_: &Dispatcher, _: &Arc<Session>, envelope: Envelope<Relay>| {
                let _ = tx.send((
                    envelope.packet_id(),
                    envelope.prefixes().to_vec(),
                    envelope.message().body.clone(),
                ));
                Ok(())
            },
            Scheduler::Inline,
        );

        let (a, b) = MemoryTransport::pair(4096);
        let gateway_session = Session::new(SessionId::new(1), Arc::new(a), SessionConfig::default());
        gateway_session.start(Arc::new(gateway));
        let origin_session = Session::new(SessionId::new(1), Arc::new(b), SessionConfig::default());
        origin_session.start(Arc::new(origin.clone()));

        let message = Relay {
            body: "hello".to_string(),
        };
        assert!(origin.send_with_prefixes(
            &origin_session,
            &message,
            &[7, -1],
            DeliveryClass::Droppable
        ));

        let (packet_id, prefixes, body) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet_id, Some(Relay::PACKET_ID));
        assert_eq!(prefixes, vec![7, -1, 900]);
        assert_eq!(body, "hello");
    }
}
