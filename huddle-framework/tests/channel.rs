use std::{collections::HashSet, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{future::join_all, stream::BoxStream, StreamExt};
use huddle_framework::{
    loopback::{LoopbackClient, LoopbackNetwork},
    model::{BlessingPattern, Member, Permissions, Tags},
    msg::{Request, SendMessage},
    net::{
        Authorizer, DispatchError, Dispatcher, GlobReply, ListenSpec, Namespace, NamespaceError,
        ServerCall, StaticPrincipal, Transport, TransportError,
    },
    Channel, ChannelConfig, ChannelError, ChannelState, Context, DiscoveryError, SendError,
    ToBytes,
};

const PATH: &str = "apps/chat/public";
const ALICE: &str = "dev/alice@example.com/laptop";
const BOB: &str = "dev/bob@example.com/phone";
const CAROL: &str = "org/carol/desktop";
const DAVE: &str = "dev/dave@example.com";
const MALLORY: &str = "dev/mallory@example.com";

fn config() -> ChannelConfig {
    ChannelConfig {
        call_timeout: Duration::from_millis(300),
        discovery_timeout: Duration::from_millis(300),
        poll_interval: None,
        ..Default::default()
    }
}

fn principal(blessing: &str) -> Arc<StaticPrincipal> {
    Arc::new(StaticPrincipal::new([blessing]))
}

fn participant_with(net: &LoopbackNetwork, blessing: &str, cfg: ChannelConfig) -> Channel {
    Channel::new(net.context(principal(blessing), cfg), PATH)
}

fn participant(net: &LoopbackNetwork, blessing: &str) -> Channel {
    participant_with(net, blessing, config())
}

fn names(members: &[Member]) -> Vec<&str> {
    members.iter().map(Member::name).collect()
}

async fn joined(net: &LoopbackNetwork, blessing: &str) -> Channel {
    let channel = participant(net, blessing);
    channel.join().await.unwrap();
    channel
}

/// Server that accepts every call and does nothing with it
struct Sink;

#[async_trait::async_trait]
impl Dispatcher for Sink {
    async fn dispatch(&self, _: ServerCall, _: Bytes) -> Result<Bytes, DispatchError> {
        Ok(Bytes::new())
    }
}

/// Operations that a [Faulty] client does not answer in time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stuck {
    /// Claims never complete
    Claims,
    /// Claims succeed but the reply takes 200ms to arrive
    SlowClaims,
    Publishes,
    /// Unpublishing and deleting never complete
    Leaves,
}

/// Loopback client that hangs on some operations
#[derive(Debug)]
struct Faulty {
    inner: LoopbackClient,
    stuck: Stuck,
}

#[async_trait::async_trait]
impl Namespace for Faulty {
    async fn set_permissions(&self, name: &str, perms: Permissions) -> Result<(), NamespaceError> {
        match self.stuck {
            Stuck::Claims => futures::future::pending().await,
            Stuck::SlowClaims => {
                self.inner.set_permissions(name, perms).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
            _ => self.inner.set_permissions(name, perms).await,
        }
    }

    async fn glob(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, GlobReply>, NamespaceError> {
        self.inner.glob(pattern, timeout).await
    }

    async fn delete(&self, name: &str, delete_subtree: bool) -> Result<(), NamespaceError> {
        match self.stuck {
            Stuck::Leaves => futures::future::pending().await,
            _ => self.inner.delete(name, delete_subtree).await,
        }
    }
}

#[async_trait::async_trait]
impl Transport for Faulty {
    async fn publish(
        &self,
        name: &str,
        dispatcher: Arc<dyn Dispatcher>,
        authorizer: Authorizer,
        listen: &ListenSpec,
    ) -> Result<(), TransportError> {
        match self.stuck {
            Stuck::Publishes => futures::future::pending().await,
            _ => self.inner.publish(name, dispatcher, authorizer, listen).await,
        }
    }

    async fn unpublish(&self, name: &str) -> Result<(), TransportError> {
        match self.stuck {
            Stuck::Leaves => futures::future::pending().await,
            _ => self.inner.unpublish(name).await,
        }
    }

    async fn call(
        &self,
        name: &str,
        method: &str,
        payload: Bytes,
        allowed_servers: Option<&[BlessingPattern]>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        self.inner
            .call(name, method, payload, allowed_servers, timeout)
            .await
    }

    async fn server_blessings(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, TransportError> {
        self.inner.server_blessings(name, timeout).await
    }
}

fn faulty_participant(net: &LoopbackNetwork, blessing: &str, stuck: Stuck) -> Channel {
    let principal = principal(blessing);
    let client = Arc::new(Faulty {
        inner: net.client(principal.clone()),
        stuck,
    });

    Channel::new(Context::new(principal, client.clone(), client, config()), PATH)
}

#[tokio::test]
async fn join_claims_a_name_only_the_joiner_controls() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    assert_eq!(alice.state(), ChannelState::Joined);

    let name = alice.locked_name().unwrap();
    let suffix = name.strip_prefix("apps/chat/public/").unwrap();
    assert!(!suffix.is_empty() && !suffix.contains('/'));

    let perms = net.permissions(&name).unwrap();
    assert_eq!(perms, Permissions::locked(vec![BlessingPattern::from(ALICE)]));
    assert!(perms.allows(Tags::RESOLVE | Tags::READ, &[MALLORY.to_owned()]));
    assert!(!perms.allows(Tags::ADMIN, &[MALLORY.to_owned()]));

    let mallory = net.client(principal(MALLORY));
    assert!(matches!(
        mallory.delete(&name, true).await,
        Err(NamespaceError::NoAccess(_))
    ));
    assert!(matches!(
        mallory
            .set_permissions(&name, Permissions::locked(vec![BlessingPattern::from(MALLORY)]))
            .await,
        Err(NamespaceError::Conflict(_))
    ));
    assert!(matches!(
        mallory
            .publish(&name, Arc::new(Sink), Authorizer::AllowEveryone, &ListenSpec::default())
            .await,
        Err(TransportError::Namespace(NamespaceError::NoAccess(_)))
    ));

    let entry = net.mount_entry(&name).unwrap();
    assert_eq!(entry.servers.len(), 1);
    assert_eq!(entry.servers[0].blessings, vec![ALICE.to_owned()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_claim_distinct_names() {
    let net = LoopbackNetwork::default();
    let blessings = (0..8)
        .map(|i| format!("dev/user{}@example.com", i))
        .collect::<Vec<_>>();
    let channels = blessings
        .iter()
        .map(|b| participant(&net, b))
        .collect::<Vec<_>>();

    for result in join_all(channels.iter().map(|c| c.join())).await {
        result.unwrap();
    }

    let locked = channels
        .iter()
        .map(|c| c.locked_name().unwrap())
        .collect::<HashSet<_>>();
    assert_eq!(locked.len(), 8);

    let members = channels[0].members().await.unwrap();
    assert_eq!(members.len(), 8);
    assert_eq!(
        members.iter().map(|m| m.path().to_owned()).collect::<HashSet<_>>(),
        locked
    );
}

#[tokio::test]
async fn members_are_listed_in_name_order() {
    let net = LoopbackNetwork::default();
    let _carol = joined(&net, CAROL).await;
    let bob = joined(&net, BOB).await;
    let alice = joined(&net, ALICE).await;

    let first = alice.members().await.unwrap();
    let second = alice.members().await.unwrap();

    assert_eq!(
        names(&first),
        vec!["alice@example.com", "bob@example.com", "org/carol/desktop"]
    );
    assert_eq!(first, second);
    assert_eq!(&*bob.cached_members(), &[] as &[Member]);
}

#[tokio::test]
async fn channels_can_be_listed_without_joining() {
    let net = LoopbackNetwork::default();
    let _bob = joined(&net, BOB).await;
    let alice = participant(&net, ALICE);

    assert_eq!(names(&alice.members().await.unwrap()), vec!["bob@example.com"]);
    assert_eq!(alice.state(), ChannelState::Left);
}

#[tokio::test]
async fn left_members_disappear() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let bob = joined(&net, BOB).await;
    let bob_name = bob.locked_name().unwrap();
    assert_eq!(alice.members().await.unwrap().len(), 2);

    bob.leave().await.unwrap();

    assert_eq!(bob.state(), ChannelState::Left);
    assert_eq!(bob.locked_name(), None);
    assert!(net.mount_entry(&bob_name).is_none());
    assert_eq!(names(&alice.members().await.unwrap()), vec!["alice@example.com"]);
}

#[tokio::test]
async fn lifecycle_rejects_invalid_transitions() {
    let net = LoopbackNetwork::default();
    let alice = participant(&net, ALICE);

    assert!(matches!(
        alice.leave().await,
        Err(ChannelError::InvalidState(ChannelState::Left))
    ));

    alice.join().await.unwrap();
    assert!(matches!(
        alice.join().await,
        Err(ChannelError::InvalidState(ChannelState::Joined))
    ));

    alice.leave().await.unwrap();
    alice.join().await.unwrap();
    assert_eq!(alice.state(), ChannelState::Joined);
}

#[tokio::test]
async fn names_left_behind_are_skipped() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;

    // A participant that claimed a name and exited before publishing on it
    net.client(principal(MALLORY))
        .set_permissions(
            "apps/chat/public/orphan",
            Permissions::locked(vec![BlessingPattern::from(MALLORY)]),
        )
        .await
        .unwrap();

    let members = alice.members().await.unwrap();
    assert_eq!(names(&members), vec!["alice@example.com"]);
}

#[tokio::test]
async fn broadcast_reaches_live_members_past_dead_ones() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let bob = joined(&net, BOB).await;
    let carol = joined(&net, CAROL).await;
    let dave = joined(&net, DAVE).await;

    assert_eq!(alice.members().await.unwrap().len(), 4);
    assert_eq!(net.sever(&carol.locked_name().unwrap()), 1);
    assert_eq!(net.stall(&dave.locked_name().unwrap()), 1);

    let mut alice_inbox = alice.messages().unwrap();
    let mut bob_inbox = bob.messages().unwrap();
    assert!(bob.messages().is_none());

    assert_eq!(alice.broadcast("hello everyone"), 4);

    let msg = tokio::time::timeout(Duration::from_secs(2), bob_inbox.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.sender(), "alice@example.com");
    assert_eq!(msg.text(), "hello everyone");

    let echo = tokio::time::timeout(Duration::from_secs(2), alice_inbox.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo.text(), "hello everyone");
}

#[tokio::test]
async fn senders_without_an_email_keep_their_full_name() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let carol = joined(&net, CAROL).await;
    let mut inbox = alice.messages().unwrap();

    let members = carol.members().await.unwrap();
    let target = members.iter().find(|m| m.name() == "alice@example.com").unwrap();
    carol.try_send_to(target, "hi alice").await.unwrap();

    let msg = inbox.next().await.unwrap();
    assert_eq!(msg.sender(), CAROL);
    assert_eq!(msg.text(), "hi alice");
}

#[tokio::test]
async fn anonymous_senders_are_unknown() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let mut inbox = alice.messages().unwrap();

    let anonymous = net.client(Arc::new(StaticPrincipal::new(Vec::<String>::new())));
    let payload = SendMessage {
        text: "guess who".to_owned(),
    }
    .encode_to_vec()
    .unwrap();
    anonymous
        .call(
            &alice.locked_name().unwrap(),
            SendMessage::METHOD,
            payload.into(),
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(inbox.next().await.unwrap().sender(), "unknown");
}

#[tokio::test]
async fn sends_to_replaced_servers_fail_identity_checks() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let bob = joined(&net, BOB).await;

    let members = alice.members().await.unwrap();
    let bob_member = members.iter().find(|m| m.name() == "bob@example.com").unwrap().clone();
    bob.leave().await.unwrap();

    net.client(principal(MALLORY))
        .publish(
            bob_member.path(),
            Arc::new(Sink),
            Authorizer::AllowEveryone,
            &ListenSpec::default(),
        )
        .await
        .unwrap();

    assert!(matches!(
        alice.try_send_to(&bob_member, "secret").await,
        Err(SendError::IdentityMismatch(_))
    ));
}

#[tokio::test]
async fn sends_to_dead_members_fail_within_the_timeout() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let bob = joined(&net, BOB).await;
    let members = alice.members().await.unwrap();
    let bob_member = members.iter().find(|m| m.name() == "bob@example.com").unwrap();

    net.stall(&bob.locked_name().unwrap());
    let result = tokio::time::timeout(Duration::from_secs(2), alice.try_send_to(bob_member, "hi"))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(SendError::MemberUnreachable(TransportError::Timeout(_)))
    ));
}

#[tokio::test]
async fn endpoints_reject_unknown_methods_and_garbled_payloads() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let name = alice.locked_name().unwrap();
    let bob = net.client(principal(BOB));

    let unknown = bob
        .call(&name, "Shout", Bytes::new(), None, Duration::from_secs(1))
        .await;
    assert!(matches!(
        unknown,
        Err(TransportError::Dispatch(DispatchError::UnknownMethod(_)))
    ));

    let garbled = bob
        .call(
            &name,
            SendMessage::METHOD,
            Bytes::from_static(&[200, 0, 0, 0, b'x']),
            None,
            Duration::from_secs(1),
        )
        .await;
    assert!(matches!(
        garbled,
        Err(TransportError::Dispatch(DispatchError::Decode(_)))
    ));
}

#[tokio::test]
async fn claims_retry_past_conflicts_for_each_joiner() {
    let net = LoopbackNetwork::default();
    net.inject_conflicts(ALICE, 12);
    net.inject_conflicts(BOB, 13);

    let alice = participant(&net, ALICE);
    let bob = participant(&net, BOB);
    let (a, b) = tokio::join!(alice.join(), bob.join());
    a.unwrap();
    b.unwrap();

    assert_ne!(alice.locked_name(), bob.locked_name());
    assert_eq!(alice.members().await.unwrap().len(), 2);
}

#[tokio::test]
async fn claims_give_up_after_every_attempt_conflicts() {
    let net = LoopbackNetwork::default();
    net.inject_conflicts(ALICE, 25);
    let alice = participant(&net, ALICE);

    assert!(matches!(
        alice.join().await,
        Err(ChannelError::LockAllocationExhausted { attempts: 25 })
    ));
    assert_eq!(alice.state(), ChannelState::Left);
    assert!(net.names().is_empty());

    net.inject_conflicts(BOB, 24);
    let bob = participant(&net, BOB);
    bob.join().await.unwrap();
    assert_eq!(net.names().len(), 1);
}

#[tokio::test]
async fn failed_publish_releases_the_claimed_name() {
    let net = LoopbackNetwork::default();
    net.fail_next_publish(ALICE);
    let alice = participant(&net, ALICE);

    assert!(matches!(
        alice.join().await,
        Err(ChannelError::PublishFailed(_))
    ));
    assert_eq!(alice.state(), ChannelState::Left);
    assert!(net.names().is_empty());

    alice.join().await.unwrap();
    assert_eq!(alice.state(), ChannelState::Joined);
}

#[tokio::test]
async fn slow_discovery_keeps_the_previous_snapshot() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let _bob = joined(&net, BOB).await;
    assert_eq!(alice.members().await.unwrap().len(), 2);

    net.set_glob_delay(Some(Duration::from_secs(5)));
    let started = tokio::time::Instant::now();
    assert!(matches!(
        alice.members().await,
        Err(ChannelError::DiscoveryFailed(DiscoveryError::Timeout))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        names(&alice.cached_members()),
        vec!["alice@example.com", "bob@example.com"]
    );

    net.set_glob_delay(None);
    assert_eq!(alice.members().await.unwrap().len(), 2);
}

#[tokio::test]
async fn verified_discovery_drops_unreachable_members() {
    let net = LoopbackNetwork::default();
    let cfg = ChannelConfig {
        verify_members: true,
        ..config()
    };
    let alice = participant_with(&net, ALICE, cfg);
    alice.join().await.unwrap();
    let bob = joined(&net, BOB).await;
    let carol = joined(&net, CAROL).await;

    net.sever(&carol.locked_name().unwrap());
    let members = alice.members().await.unwrap();

    assert_eq!(names(&members), vec!["alice@example.com", "bob@example.com"]);
    assert_eq!(
        members[1].path(),
        bob.locked_name().unwrap().as_str()
    );
}

#[tokio::test]
async fn background_refresh_reports_new_members() {
    let net = LoopbackNetwork::default();
    let cfg = ChannelConfig {
        poll_interval: Some(Duration::from_millis(20)),
        ..config()
    };
    let alice = participant_with(&net, ALICE, cfg);
    let mut updates = alice.member_updates();
    alice.join().await.unwrap();
    let _bob = joined(&net, BOB).await;

    let seen = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            updates.changed().await.unwrap();
            let current = updates.borrow_and_update().clone();
            if current.len() == 2 {
                break current;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(names(&seen), vec!["alice@example.com", "bob@example.com"]);
    assert_eq!(alice.cached_members().len(), 2);

    alice.leave().await.unwrap();
}

#[tokio::test]
async fn user_name_is_derived_from_blessings() {
    let net = LoopbackNetwork::default();

    assert_eq!(participant(&net, ALICE).user_name(), "alice@example.com");
    assert_eq!(participant(&net, CAROL).user_name(), CAROL);
}

#[tokio::test]
async fn participants_without_blessings_cannot_join() {
    let net = LoopbackNetwork::default();
    let anonymous = Arc::new(StaticPrincipal::new(Vec::<String>::new()));
    let channel = Channel::new(net.context(anonymous, config()), PATH);

    assert!(matches!(channel.join().await, Err(ChannelError::NoIdentity)));
    assert_eq!(channel.state(), ChannelState::Left);
    assert!(net.names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_claims_time_out_one_attempt_at_a_time() {
    let net = LoopbackNetwork::default();
    let alice = faulty_participant(&net, ALICE, Stuck::Claims);

    let result = tokio::time::timeout(Duration::from_secs(60), alice.join())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(ChannelError::LockAllocationExhausted { attempts: 25 })
    ));
    assert_eq!(alice.state(), ChannelState::Left);
}

#[tokio::test(start_paused = true)]
async fn unanswered_publish_releases_the_claimed_name() {
    let net = LoopbackNetwork::default();
    let alice = faulty_participant(&net, ALICE, Stuck::Publishes);

    assert!(matches!(
        alice.join().await,
        Err(ChannelError::PublishFailed(TransportError::Timeout(_)))
    ));
    assert_eq!(alice.state(), ChannelState::Left);
    assert!(net.names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn leave_finishes_when_the_namespace_stops_answering() {
    let net = LoopbackNetwork::default();
    let alice = faulty_participant(&net, ALICE, Stuck::Leaves);
    alice.join().await.unwrap();

    assert!(matches!(
        alice.leave().await,
        Err(ChannelError::UnpublishFailed(TransportError::Timeout(_)))
    ));
    assert_eq!(alice.state(), ChannelState::Left);
    assert_eq!(alice.locked_name(), None);

    alice.join().await.unwrap();
    assert_eq!(alice.state(), ChannelState::Joined);
}

#[tokio::test(start_paused = true)]
async fn abandoned_joins_release_their_claim() {
    let net = LoopbackNetwork::default();
    let alice = faulty_participant(&net, ALICE, Stuck::SlowClaims);

    assert!(tokio::time::timeout(Duration::from_millis(50), alice.join())
        .await
        .is_err());
    assert_eq!(alice.state(), ChannelState::Left);

    // Release happens in the background
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(net.names().is_empty());

    alice.join().await.unwrap();
    assert_eq!(alice.state(), ChannelState::Joined);
    assert_eq!(net.names().len(), 1);
}

#[tokio::test]
async fn failed_leaves_still_end_left() {
    let net = LoopbackNetwork::default();

    let alice = joined(&net, ALICE).await;
    let alice_name = alice.locked_name().unwrap();
    net.fail_next_delete(ALICE);

    assert!(matches!(
        alice.leave().await,
        Err(ChannelError::DeleteFailed(NamespaceError::Unavailable(_)))
    ));
    assert_eq!(alice.state(), ChannelState::Left);
    assert_eq!(alice.locked_name(), None);
    // Unpublished even though the name could not be deleted
    assert!(!net.mount_entry(&alice_name).unwrap().has_servers());

    let bob = joined(&net, BOB).await;
    let bob_name = bob.locked_name().unwrap();
    net.fail_next_unpublish(BOB);

    assert!(matches!(
        bob.leave().await,
        Err(ChannelError::UnpublishFailed(_))
    ));
    assert_eq!(bob.state(), ChannelState::Left);
    assert_eq!(bob.locked_name(), None);
    assert!(net.mount_entry(&bob_name).is_none());
}

#[tokio::test(start_paused = true)]
async fn verified_discovery_shares_one_timeout() {
    let net = LoopbackNetwork::default();
    let cfg = ChannelConfig {
        verify_members: true,
        ..config()
    };
    let alice = participant_with(&net, ALICE, cfg);
    alice.join().await.unwrap();
    let _bob = joined(&net, BOB).await;
    let carol = joined(&net, CAROL).await;

    net.stall(&carol.locked_name().unwrap());
    net.set_glob_delay(Some(Duration::from_millis(200)));

    let started = tokio::time::Instant::now();
    let members = alice.members().await.unwrap();

    assert!(started.elapsed() <= Duration::from_millis(300));
    assert_eq!(names(&members), vec!["alice@example.com", "bob@example.com"]);
}

#[tokio::test]
async fn rejoined_members_are_reported_at_their_new_name() {
    let net = LoopbackNetwork::default();
    let alice = joined(&net, ALICE).await;
    let bob = joined(&net, BOB).await;

    let mut updates = alice.member_updates();
    alice.members().await.unwrap();
    assert!(updates.has_changed().unwrap());
    updates.borrow_and_update();

    bob.leave().await.unwrap();
    bob.join().await.unwrap();
    alice.members().await.unwrap();

    assert!(updates.has_changed().unwrap());
    let current = updates.borrow_and_update().clone();
    let rejoined = current.iter().find(|m| m.name() == "bob@example.com").unwrap();
    assert_eq!(rejoined.path(), bob.locked_name().unwrap());
}
