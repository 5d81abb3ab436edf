use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use daybook_common::{
    AgentConfig, CuratorPhase, EventRecord, HaltReason, ProviderCheck, ReVerificationWinner,
    RecordPatch, SelectionStrategy, Tier, Verdict,
};
use daybook_curator::{CuratorAgent, CuratorError};
use daybook_pipeline::testing::{
    article, contradicted, day, significant, uncertain, verified, MockSource, Mocks, ScriptedProvider,
};
use daybook_pipeline::VerificationReport;
use daybook_store::{MemoryStore, RecordStore, SessionStore};

fn summarized(date: NaiveDate, summary: &str) -> EventRecord {
    let mut record = EventRecord::new(date);
    record.summary = summary.to_string();
    record
}

fn stored_check(report: VerificationReport) -> ProviderCheck {
    ProviderCheck {
        verdict: report.verdict,
        confidence: report.confidence,
        reasoning: report.reasoning,
        correct_date_text: report.correct_date_text,
        citations: report.citations,
        checked_at: chrono::Utc::now(),
    }
}

/// A summarized record already carrying both checks.
fn checked(date: NaiveDate, summary: &str, primary: VerificationReport, secondary: VerificationReport) -> EventRecord {
    let mut record = summarized(date, summary);
    record.apply(
        &RecordPatch::automated()
            .fact_check(stored_check(primary))
            .cross_check(stored_check(secondary)),
        chrono::Utc::now(),
    );
    record
}

fn agent(mocks: &Mocks, store: &Arc<MemoryStore>) -> CuratorAgent {
    let analyzer = mocks.analyzer(store.clone(), SelectionStrategy::DualVerification);
    CuratorAgent::new(Arc::new(analyzer), store.clone())
}

/// The fields a curator run is expected to settle.
fn settled(records: &[EventRecord]) -> Vec<(NaiveDate, String, bool, Option<String>, Option<Verdict>, Option<Verdict>)> {
    records
        .iter()
        .map(|r| {
            (
                r.date,
                r.summary.clone(),
                r.is_flagged,
                r.flag_reason.clone(),
                r.fact_check_verdict,
                r.perplexity_verdict,
            )
        })
        .collect()
}

// Four dates: clean, uncertain, disputed, never analyzed.
fn mixed_fixture(stall: Duration) -> (Arc<MemoryStore>, Mocks) {
    let (d1, d2, d3, d4) = (day(2024, 3, 10), day(2024, 3, 11), day(2024, 3, 12), day(2024, 3, 13));
    let store = Arc::new(MemoryStore::with_records([
        summarized(d1, "Halving completes on schedule"),
        summarized(d2, "Mining difficulty reaches a new high"),
        summarized(d3, "Exchange lists a new pair"),
        EventRecord::new(d4),
    ]));
    let mocks = Mocks::new(
        MockSource::new().on(d4, Tier::Primary, vec![article("n4", 0.9)]),
        ScriptedProvider::new("openai").judge(d4, Tier::Primary, significant("n4")),
    )
    .verifiers(
        ScriptedProvider::new("openai"),
        ScriptedProvider::new("perplexity")
            .report(d2, uncertain(40))
            .report(d3, contradicted(80, None))
            .stalling("verify", stall),
    );
    (store, mocks)
}

fn sequential() -> AgentConfig {
    AgentConfig {
        max_passes: 2,
        parallel_workers: 1,
        batch_size: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn full_run_settles_every_issue() {
    let (store, mocks) = mixed_fixture(Duration::ZERO);
    let curator = agent(&mocks, &store);

    let session = curator.run(sequential()).await.unwrap();

    assert_eq!(session.phase, CuratorPhase::Completed);
    assert_eq!(session.halted, None);
    assert_eq!(session.counters.processed, 7);
    assert_eq!(session.counters.approved, 1);
    assert_eq!(session.counters.flagged, 2);
    assert_eq!(session.counters.deferred, 1);
    assert!((session.counters.spent - 0.15).abs() < 1e-9);

    let d2 = store.get(day(2024, 3, 11)).await.unwrap().unwrap();
    assert!(d2.flag_reason.as_deref().unwrap().contains("still uncertain"));
    let d3 = store.get(day(2024, 3, 12)).await.unwrap().unwrap();
    assert!(d3.flag_reason.as_deref().unwrap().contains("disagree"));
    let d4 = store.get(day(2024, 3, 13)).await.unwrap().unwrap();
    assert_eq!(d4.top_article_id.as_deref(), Some("n4"));
    assert_eq!(d4.confidence_score, Some(90));
    assert!(!d4.is_flagged);

    // Finished sessions are not kept around for resuming.
    assert_eq!(store.session_count().await, 0);
    assert!(store.load_session(session.id).await.unwrap().is_none());
    for date in [day(2024, 3, 10), day(2024, 3, 11), day(2024, 3, 12), day(2024, 3, 13)] {
        assert!(!store.is_locked(date).await);
    }
}

#[tokio::test]
async fn resumed_run_matches_uninterrupted_run() {
    let stall = Duration::from_millis(40);

    let (baseline_store, baseline_mocks) = mixed_fixture(stall);
    let baseline = agent(&baseline_mocks, &baseline_store)
        .run(sequential())
        .await
        .unwrap();
    assert!(baseline.is_complete());

    let (store, mocks) = mixed_fixture(stall);
    let curator = agent(&mocks, &store);
    let session = curator.prepare(sequential()).await.unwrap();
    let id = session.id;

    let (interrupted, _) = tokio::join!(curator.execute(session), async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        curator.cancel();
    });
    let interrupted = interrupted.unwrap();
    assert_eq!(interrupted.halted, Some(HaltReason::Cancelled));
    assert!(!interrupted.is_complete());
    assert!(!interrupted.queue.is_empty());

    let resumed = curator.resume(id).await.unwrap();
    assert!(resumed.is_complete());
    assert_eq!(resumed.id, id);

    assert_eq!(settled(&store.all().await), settled(&baseline_store.all().await));
    assert_eq!(resumed.counters, baseline.counters);
}

#[tokio::test]
async fn halted_session_stays_checkpointed_until_it_completes() {
    let dates: Vec<NaiveDate> = (1..=3).map(|d| day(2024, 7, d)).collect();
    let store = Arc::new(MemoryStore::with_records(
        dates.iter().map(|d| summarized(*d, "Hashrate recovers")),
    ));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    let halted = curator
        .run(AgentConfig {
            max_budget: 0.02,
            ..sequential()
        })
        .await
        .unwrap();
    assert_eq!(halted.halted, Some(HaltReason::Budget));
    assert_eq!(store.session_count().await, 1);

    let mut raised = store.load_session(halted.id).await.unwrap().unwrap();
    raised.config.max_budget = 1.0;
    store.save_session(&raised).await.unwrap();

    let finished = curator.resume(halted.id).await.unwrap();
    assert!(finished.is_complete());
    assert_eq!(store.session_count().await, 0);
}

#[tokio::test]
async fn rejected_reanalysis_leaves_the_record_unsummarized() {
    let date = day(2024, 4, 20);
    let store = Arc::new(MemoryStore::with_records([EventRecord::new(date)]));
    let mocks = Mocks::new(
        MockSource::new().on(date, Tier::Primary, vec![article("r1", 0.9)]),
        ScriptedProvider::new("openai").judge(date, Tier::Primary, significant("r1")),
    )
    .verifiers(
        ScriptedProvider::new("openai").report(date, verified(50)),
        ScriptedProvider::new("perplexity").report(date, verified(50)),
    );
    let curator = agent(&mocks, &store);

    let session = curator
        .run(AgentConfig {
            max_passes: 1,
            skip_verification: true,
            ..sequential()
        })
        .await
        .unwrap();

    assert!(session.is_complete());
    assert_eq!(session.counters.rejected, 1);
    assert_eq!(session.counters.approved, 0);
    assert_eq!(mocks.verifiers[0].calls("verify"), 1);

    let record = store.get(date).await.unwrap().unwrap();
    assert!(record.summary.is_empty());
    assert!(record.top_article_id.is_none());
    assert!(record.fact_check_verdict.is_none());
    assert!(record.is_flagged);
    assert!(record.flag_reason.as_deref().unwrap().contains("50%"));
    assert!(!store.is_locked(date).await);
}

#[tokio::test]
async fn correction_into_a_busy_date_leaves_its_lock_alone() {
    let (busy, hinted_from) = (day(2023, 5, 7), day(2023, 5, 12));
    let store = Arc::new(MemoryStore::with_records([
        checked(busy, "Exchange halts withdrawals", verified(90), uncertain(40)),
        checked(
            hinted_from,
            "Withdrawals halted at exchange",
            contradicted(60, None),
            contradicted(95, Some("2023-05-07")),
        ),
    ]));
    let mocks = Mocks::new(
        MockSource::new().on(busy, Tier::Primary, vec![article("c1", 0.9)]),
        ScriptedProvider::new("openai").judge(busy, Tier::Primary, significant("c1")),
    )
    .verifiers(
        ScriptedProvider::new("openai").stalling("verify", Duration::from_millis(400)),
        ScriptedProvider::new("perplexity"),
    );
    let curator = Arc::new(agent(&mocks, &store));

    let run = tokio::spawn({
        let curator = curator.clone();
        async move {
            curator
                .run(AgentConfig {
                    max_passes: 1,
                    parallel_workers: 2,
                    skip_verification: true,
                    ..Default::default()
                })
                .await
        }
    });

    // The recheck of `busy` is still stalled; the correction has long finished.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.is_locked(busy).await);
    let corrected = store.get(hinted_from).await.unwrap().unwrap();
    assert_eq!(corrected.re_verification_winner, Some(ReVerificationWinner::Corrected));

    let session = run.await.unwrap().unwrap();
    assert!(session.is_complete());
    assert!(!store.is_locked(busy).await);
    assert!(!store.is_locked(hinted_from).await);
    assert_eq!(store.get(busy).await.unwrap().unwrap().summary, "Exchange halts withdrawals");
}

#[tokio::test]
async fn spend_never_exceeds_budget() {
    let dates: Vec<NaiveDate> = (1..=5).map(|d| day(2024, 5, d)).collect();
    let store = Arc::new(MemoryStore::with_records(
        dates.iter().map(|d| summarized(*d, "Network upgrade activates")),
    ));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    let config = AgentConfig {
        max_budget: 0.05,
        ..sequential()
    };
    let session = curator.run(config.clone()).await.unwrap();

    assert_eq!(session.halted, Some(HaltReason::Budget));
    assert_eq!(session.counters.processed, 2);
    assert!((session.counters.spent - 0.04).abs() < 1e-9);
    assert!(session.counters.spent <= config.max_budget);
    assert_eq!(session.queue.len(), 3);
    assert_eq!(mocks.verifiers[0].calls("verify"), 2);

    // Resuming with nothing left to spend goes no further.
    let again = curator.resume(session.id).await.unwrap();
    assert_eq!(again.halted, Some(HaltReason::Budget));
    assert_eq!(again.counters.processed, 2);
    assert!(again.counters.spent >= session.counters.spent);
    assert!(again.counters.spent <= config.max_budget);
}

#[tokio::test]
async fn zero_budget_test_mode_halts_before_any_paid_call() {
    let store = Arc::new(MemoryStore::with_records([
        summarized(day(2024, 6, 1), "Stablecoin depegs briefly"),
        summarized(day(2024, 6, 2), "Lightning capacity grows"),
    ]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    let session = curator
        .run(AgentConfig {
            test_mode: true,
            max_budget: 0.0,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(session.halted, Some(HaltReason::Budget));
    assert_eq!(session.counters.processed, 0);
    assert_eq!(session.counters.spent, 0.0);
    assert_eq!(mocks.verifiers[0].total_calls(), 0);
    assert_eq!(mocks.verifiers[1].total_calls(), 0);
    assert!(session.planned.is_empty());
}

#[tokio::test]
async fn test_mode_plans_without_writing() {
    let (d1, d2, d3) = (day(2024, 8, 1), day(2024, 8, 2), day(2024, 8, 3));
    let store = Arc::new(MemoryStore::with_records([
        summarized(d1, "Regulator sues an exchange"),
        summarized(d2, "Fees spike during inscriptions"),
        EventRecord::new(d3),
    ]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai")).verifiers(
        ScriptedProvider::new("openai"),
        ScriptedProvider::new("perplexity").report(d1, contradicted(80, None)),
    );
    let curator = agent(&mocks, &store);
    let before = store.all().await;

    let session = curator
        .run(AgentConfig {
            test_mode: true,
            test_limit: 2,
            parallel_workers: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(session.halted, Some(HaltReason::TestLimit));
    assert_eq!(session.counters.processed, 2);
    assert_eq!(session.counters.flagged, 1);
    assert_eq!(session.planned.len(), 2);
    assert!(session.planned.iter().all(|p| p.action == "fact_check"));
    assert_eq!(store.all().await, before);
    assert_eq!(store.session_count().await, 0);
}

#[tokio::test]
async fn confident_date_correction_moves_event_to_empty_date() {
    let (date, corrected) = (day(2023, 5, 12), day(2023, 5, 7));
    let store = Arc::new(MemoryStore::with_records([summarized(date, "Exchange halts withdrawals")]));
    let mocks = Mocks::new(
        MockSource::new().on(corrected, Tier::Primary, vec![article("c1", 0.9)]),
        ScriptedProvider::new("openai").judge(corrected, Tier::Primary, significant("c1")),
    )
    .verifiers(
        ScriptedProvider::new("openai"),
        ScriptedProvider::new("perplexity").report(date, contradicted(95, Some("2023-05-07"))),
    );
    let curator = agent(&mocks, &store);

    let session = curator
        .run(AgentConfig {
            max_passes: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(session.is_complete());
    assert_eq!(session.counters.approved, 1);

    let original = store.get(date).await.unwrap().unwrap();
    assert!(original.re_verified);
    assert_eq!(original.re_verification_date, Some(corrected));
    assert_eq!(original.re_verification_winner, Some(ReVerificationWinner::Corrected));
    assert!(original.is_flagged);

    let moved = store.get(corrected).await.unwrap().unwrap();
    assert_eq!(moved.top_article_id.as_deref(), Some("c1"));
    assert!(moved.has_summary());
    assert!(!moved.is_manual_override);
}

#[tokio::test]
async fn low_confidence_correction_is_flagged_without_reverifying() {
    let date = day(2023, 5, 12);
    let store = Arc::new(MemoryStore::with_records([summarized(date, "Exchange halts withdrawals")]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai")).verifiers(
        ScriptedProvider::new("openai"),
        ScriptedProvider::new("perplexity").report(date, contradicted(60, Some("2023-05-07"))),
    );
    let curator = agent(&mocks, &store);

    let session = curator
        .run(AgentConfig {
            max_passes: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(session.counters.rejected, 1);
    let record = store.get(date).await.unwrap().unwrap();
    assert!(record.is_flagged);
    assert!(!record.re_verified);
    assert!(record.flag_reason.as_deref().unwrap().contains("below the 90%"));
    assert_eq!(mocks.writer.calls("judge_significance"), 0);
    assert!(store.get(day(2023, 5, 7)).await.unwrap().is_none());
}

#[tokio::test]
async fn manual_records_are_never_touched() {
    let date = day(2024, 9, 9);
    let mut manual = summarized(date, "Hand-written entry");
    manual.is_manual_override = true;
    let store = Arc::new(MemoryStore::with_records([manual.clone()]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    let session = curator.run(sequential()).await.unwrap();

    assert!(session.is_complete());
    assert_eq!(session.counters.processed, 0);
    assert_eq!(store.get(date).await.unwrap(), Some(manual));
    assert_eq!(mocks.verifiers[0].total_calls(), 0);
}

#[tokio::test]
async fn resuming_unknown_session_fails() {
    let store = Arc::new(MemoryStore::new());
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    assert!(curator.resume(uuid::Uuid::new_v4()).await.is_err());
}

#[tokio::test]
async fn status_reflects_finished_run() {
    let store = Arc::new(MemoryStore::with_records([summarized(day(2024, 1, 2), "Spot ETF trading begins")]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = agent(&mocks, &store);

    let session = curator.run(sequential()).await.unwrap();
    let status = curator.status();

    assert_eq!(status.session_id, Some(session.id));
    assert!(!status.running);
    assert_eq!(status.phase, Some(CuratorPhase::Completed));
    assert_eq!(status.counters.processed, 1);
}

async fn wait_until_idle(curator: &CuratorAgent) {
    for _ in 0..200 {
        if !curator.status().running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("curator run did not finish");
}

#[tokio::test]
async fn cancel_before_the_background_run_starts_is_honored() {
    let store = Arc::new(MemoryStore::with_records([
        summarized(day(2024, 10, 1), "Exchange reopens deposits"),
        summarized(day(2024, 10, 2), "Miners capitulate"),
    ]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let curator = Arc::new(agent(&mocks, &store));

    let session = curator.start(sequential()).await.unwrap();
    assert!(curator.status().running);
    curator.cancel();
    wait_until_idle(&curator).await;

    let status = curator.status();
    assert_eq!(status.session_id, Some(session.id));
    assert_eq!(status.halted, Some(HaltReason::Cancelled));
    assert_eq!(status.counters.processed, 0);
    assert_eq!(mocks.verifiers[0].total_calls(), 0);
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn a_started_run_refuses_a_second_start() {
    let date = day(2024, 10, 3);
    let store = Arc::new(MemoryStore::with_records([summarized(date, "Fees fall to a yearly low")]));
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai")).verifiers(
        ScriptedProvider::new("openai").stalling("verify", Duration::from_millis(200)),
        ScriptedProvider::new("perplexity"),
    );
    let curator = Arc::new(agent(&mocks, &store));

    let first = curator.start(sequential()).await.unwrap();
    let second = curator.start(sequential()).await.unwrap_err();
    assert_eq!(second.downcast_ref::<CuratorError>(), Some(&CuratorError::AlreadyRunning));
    let resumed = curator.start_resume(first.id).await.unwrap_err();
    assert_eq!(resumed.downcast_ref::<CuratorError>(), Some(&CuratorError::AlreadyRunning));
    assert!(curator.run(sequential()).await.is_err());

    wait_until_idle(&curator).await;
    assert_eq!(curator.status().phase, Some(CuratorPhase::Completed));
    assert_eq!(store.session_count().await, 0);

    let again = curator.start_resume(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(again.downcast_ref::<CuratorError>(), Some(CuratorError::UnknownSession(_))));
    assert!(!curator.status().running);
}
