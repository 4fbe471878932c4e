use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use alcoguard_agent::{
    BartenderAgent, Broker, BrokerSettings, GuardianAgent, GuardianSettings, SessionAnalyzer,
    TurnRequest, VetoPolicy,
};
use alcoguard_core::audit::{HistoryFilter, InMemoryMessageLog, MessageLog};
use alcoguard_core::clock::ManualClock;
use alcoguard_core::domain::message::{AgentId, EventType, MessageRecord, NewMessage};
use alcoguard_core::domain::payload::{DrinkAddedPayload, VetoPayload, WirePayload};
use alcoguard_core::domain::session::{Drink, DrinkInput, Session, UserId};
use alcoguard_core::domain::warning::WarningLevel;
use alcoguard_db::{InMemorySessionRepository, SessionRepository};

struct Harness {
    broker: Arc<Broker>,
    log: InMemoryMessageLog,
    repo: Arc<InMemorySessionRepository>,
    clock: Arc<ManualClock>,
    guardian: Arc<GuardianAgent>,
    bartender: Arc<BartenderAgent>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 19, 0, 0).single().expect("valid time")
}

fn harness() -> Harness {
    let log = InMemoryMessageLog::default();
    let repo = Arc::new(InMemorySessionRepository::default());
    let clock = Arc::new(ManualClock::new(start()));
    let settings = BrokerSettings { handler_backoff: Duration::ZERO, history_limit_max: 1_000 };
    let broker = Arc::new(Broker::new(Arc::new(log.clone()), clock.clone(), settings));

    let analyzer = Arc::new(SessionAnalyzer::new(repo.clone(), clock.clone()));
    let guardian = Arc::new(GuardianAgent::new(
        GuardianSettings::default(),
        analyzer,
        VetoPolicy::default(),
        clock.clone(),
    ));
    let bartender = Arc::new(BartenderAgent::new(
        AgentId::from("bartender"),
        AgentId::from("guardian"),
        clock.clone(),
    ));

    broker
        .register("guardian", GuardianAgent::subscriptions(), guardian.clone())
        .expect("register guardian");
    broker
        .register("bartender", BartenderAgent::subscriptions(), bartender.clone())
        .expect("register bartender");
    let handles = broker.start_all().expect("start agents");

    Harness { broker, log, repo, clock, guardian, bartender, handles }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

async fn records_of(log: &InMemoryMessageLog, event_type: EventType) -> Vec<MessageRecord> {
    log.history(&HistoryFilter { from: None, event_type: Some(event_type) }, 100)
        .await
        .expect("history")
}

async fn drink_at(harness: &Harness, session: &Session, minute: i64) -> DrinkAddedPayload {
    let at = start() + chrono::Duration::minutes(minute);
    let drink = Drink::record(
        session.id.clone(),
        DrinkInput { drink_type: "beer".to_owned(), volume_ml: 350.0, alcohol_percentage: 5.0 },
        at,
    )
    .expect("valid drink");
    let payload = DrinkAddedPayload {
        user_id: session.user_id.0.clone(),
        session_id: session.id.0.clone(),
        drink_id: Some(drink.id.0.clone()),
        drink_type: drink.drink_type.clone(),
        alcohol_g: drink.alcohol_g,
    };
    harness.repo.append_drink(drink).await.expect("append");
    harness.clock.set(at);
    payload
}

#[tokio::test]
async fn three_quick_beers_produce_exactly_one_veto_consumed_by_one_turn() {
    let harness = harness();
    let session = Session::start(UserId("u-1".to_owned()), start());
    harness.repo.create_session(session.clone()).await.expect("create");

    drink_at(&harness, &session, 0).await;
    drink_at(&harness, &session, 5).await;
    let payload = drink_at(&harness, &session, 10).await;
    harness
        .broker
        .publish(
            NewMessage::new(EventType::DrinkAdded, "system")
                .to("guardian")
                .with_payload(payload.into_payload().expect("payload")),
        )
        .await
        .expect("publish drink.added");

    let bartender = harness.bartender.clone();
    assert!(eventually(|| bartender.has_pending_veto("u-1")).await, "veto reaches the bartender");

    let vetoes = records_of(&harness.log, EventType::GuardianVeto).await;
    assert_eq!(vetoes.len(), 1);
    let veto = VetoPayload::from_payload(&vetoes[0].message.payload).expect("veto payload");
    assert_eq!(veto.severity, WarningLevel::Stop);
    assert_eq!(vetoes[0].message.to.as_str(), "bartender");
    assert_eq!(veto.user_id, "u-1");
    assert_eq!(veto.session_id, session.id.0);

    let log = harness.log.clone();
    let veto_id = vetoes[0].message.id.clone();
    assert!(
        eventually(|| log
            .records()
            .iter()
            .any(|record| record.message.id == veto_id && record.processed))
        .await
    );
    let veto_record = log.find(&veto_id).await.expect("find").expect("present");
    assert_eq!(veto_record.processed_by, Some(AgentId::from("bartender")));

    let alerts = records_of(&harness.log, EventType::GuardianAlert).await;
    assert_eq!(alerts.len(), 1);

    let turn = TurnRequest {
        user_id: "u-1".to_owned(),
        session_id: Some(session.id.0.clone()),
        message: "hello again".to_owned(),
    };
    let first = harness.bartender.compose_turn(harness.broker.as_ref(), turn.clone()).await.expect("turn");
    assert!(first.must_decline);
    assert_eq!(first.severity, Some(WarningLevel::Stop));
    let second = harness.bartender.compose_turn(harness.broker.as_ref(), turn).await.expect("turn");
    assert!(!second.must_decline);

    let monitored = harness.guardian.monitored_sessions();
    assert_eq!(monitored.len(), 1);
    assert_eq!(monitored[0].vetoes_sent, 1);
}

#[tokio::test]
async fn session_stats_broadcast_skips_the_guardian_itself() {
    let harness = harness();
    let session = Session::start(UserId("u-2".to_owned()), start());
    harness.repo.create_session(session.clone()).await.expect("create");

    let payload = drink_at(&harness, &session, 0).await;
    harness.clock.set(start() + chrono::Duration::hours(3));
    harness
        .broker
        .publish(
            NewMessage::new(EventType::DrinkAdded, "system")
                .to("guardian")
                .with_payload(payload.into_payload().expect("payload")),
        )
        .await
        .expect("publish");

    let log = harness.log.clone();
    assert!(
        eventually(|| log
            .records()
            .iter()
            .any(|record| record.message.event_type == EventType::SessionStats && record.processed))
        .await
    );

    let stats = records_of(&harness.log, EventType::SessionStats).await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].processed_by, Some(AgentId::from("bartender")));
    assert!(records_of(&harness.log, EventType::GuardianVeto).await.is_empty());
    assert!(!harness.bartender.has_pending_veto("u-2"));
}

#[tokio::test]
async fn mood_changes_are_archived_when_no_monitor_is_registered() {
    let harness = harness();
    let turn = TurnRequest {
        user_id: "u-3".to_owned(),
        session_id: None,
        message: "so tired today".to_owned(),
    };

    let directive =
        harness.bartender.compose_turn(harness.broker.as_ref(), turn).await.expect("turn");
    assert_eq!(directive.mood, "negative");

    let moods = records_of(&harness.log, EventType::MoodDetected).await;
    assert_eq!(moods.len(), 1);
    assert_eq!(moods[0].message.to.as_str(), "mood_monitor");
    assert!(!moods[0].processed);

    let stats = harness.broker.agent_stats();
    assert_eq!(stats.registered_agents, vec!["guardian".to_owned(), "bartender".to_owned()]);
    assert_eq!(stats.running_agents.len(), 2);
}
