mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Duration;
use exam_core::model::{
    ExamId, ResultId, SessionFragment, SessionPhase, SessionStateError, UNANSWERED_SENTINEL,
};
use exam_core::time::{fixed_now, manual_clock};
use services::{
    SessionController, SessionError, SubmitOutcome, SubmitPrompt, TickOutcome,
};
use storage::mapping::FragmentField;
use storage::repository::{InMemorySessionStore, SessionStore};

use common::{FlakyStore, ScriptedSubmitter, StaticExams, build_exam, qid};

const EXAM: ExamId = ExamId::new(1);

fn persisted(remaining: u32, seconds_ago: i64) -> SessionFragment {
    SessionFragment {
        current_index: 1,
        answers: BTreeMap::from([(qid(1), 2)]),
        flagged: BTreeSet::from([qid(2)]),
        remaining_seconds: remaining,
        last_tick_at: fixed_now() - Duration::seconds(seconds_ago),
    }
}

#[tokio::test]
async fn fresh_start_uses_full_duration_and_persists() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(controller.remaining_seconds(), 120);
    assert_eq!(controller.state().current_index(), 0);

    let fragment = store.read(EXAM).await.unwrap().expect("fragment written on start");
    assert_eq!(fragment.remaining_seconds, 120);
    assert_eq!(fragment.last_tick_at, fixed_now());
    assert!(fragment.answers.is_empty());
}

#[tokio::test]
async fn resume_after_crash_reconciles_elapsed_time() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    store.write(EXAM, &persisted(45, 10)).await.unwrap();

    let controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(controller.remaining_seconds(), 35);
    assert_eq!(controller.state().current_index(), 1);
    assert_eq!(controller.state().answer(qid(1)), Some(2));
    assert!(controller.state().is_flagged(qid(2)));

    let fragment = store.read(EXAM).await.unwrap().unwrap();
    assert_eq!(fragment.remaining_seconds, 35);
    assert_eq!(fragment.last_tick_at, fixed_now());
}

#[tokio::test]
async fn reconciliation_is_max_of_zero_and_remaining_minus_elapsed() {
    for delta in [0_i64, 1, 30, 44] {
        let (_handle, clock) = manual_clock();
        let store = InMemorySessionStore::new();
        store.write(EXAM, &persisted(45, delta)).await.unwrap();

        let controller = SessionController::start(
            build_exam(3, 2),
            clock,
            Arc::new(store),
            ScriptedSubmitter::accepting(),
        )
        .await
        .unwrap();

        assert_eq!(
            i64::from(controller.remaining_seconds()),
            45 - delta,
            "delta {delta}"
        );
    }
}

#[tokio::test]
async fn expired_session_is_submitted_on_start() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    store.write(EXAM, &persisted(45, 600)).await.unwrap();
    let submitter = ScriptedSubmitter::accepting();

    let controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();

    assert_eq!(controller.phase(), SessionPhase::Submitted);
    assert_eq!(controller.result_id(), Some(ResultId::new(1)));
    assert_eq!(
        submitter.records()[0].wire_answers(),
        vec![2, UNANSWERED_SENTINEL, UNANSWERED_SENTINEL]
    );
    assert!(store.read(EXAM).await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_fragment_starts_fresh() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    store.write(EXAM, &persisted(45, 10)).await.unwrap();
    store
        .write_field(EXAM, FragmentField::Answers, "{{{")
        .unwrap();

    let controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(controller.remaining_seconds(), 120);
    assert!(controller.state().answers().is_empty());
    assert_eq!(store.read(EXAM).await.unwrap().unwrap().remaining_seconds, 120);
    assert_ne!(
        store.field(EXAM, FragmentField::Answers).unwrap().as_deref(),
        Some("{{{")
    );
}

#[tokio::test]
async fn every_mutation_is_mirrored_to_the_store() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    controller.select_answer(qid(1), 0).await.unwrap();
    controller.select_answer(qid(2), 3).await.unwrap();
    controller.select_answer(qid(1), 2).await.unwrap();
    controller.select_answer(qid(1), 2).await.unwrap();
    controller.navigate(2).await.unwrap();
    assert!(controller.toggle_current_flag().await.unwrap());

    let fragment = store.read(EXAM).await.unwrap().unwrap();
    assert_eq!(fragment.answers, BTreeMap::from([(qid(1), 2), (qid(2), 3)]));
    assert_eq!(fragment.current_index, 2);
    assert_eq!(fragment.flagged, BTreeSet::from([qid(3)]));
    assert_eq!(fragment, controller.state().fragment());
}

#[tokio::test]
async fn invalid_input_is_rejected_without_side_effects() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(1), 1).await.unwrap();
    let before = store.read(EXAM).await.unwrap();

    let err = controller.select_answer(qid(1), 4).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(SessionStateError::OptionOutOfRange { option: 4, .. })
    ));
    let err = controller.navigate(3).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(SessionStateError::IndexOutOfRange { index: 3, count: 3 })
    ));
    let err = controller.toggle_flag(qid(9)).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(SessionStateError::UnknownQuestion(_))
    ));

    assert_eq!(controller.state().answer(qid(1)), Some(1));
    assert_eq!(store.read(EXAM).await.unwrap(), before);
}

#[tokio::test]
async fn failed_write_leaves_state_unchanged() {
    let (_handle, clock) = manual_clock();
    let store = FlakyStore::new(InMemorySessionStore::new());
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    store.fail_writes(true);
    let err = controller.select_answer(qid(1), 1).await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));
    assert_eq!(controller.state().answer(qid(1)), None);

    store.fail_writes(false);
    controller.select_answer(qid(1), 1).await.unwrap();
    assert_eq!(controller.state().answer(qid(1)), Some(1));
}

#[tokio::test]
async fn timer_keeps_running_while_the_store_fails() {
    let (handle, clock) = manual_clock();
    let store = FlakyStore::new(InMemorySessionStore::new());
    let submitter = ScriptedSubmitter::accepting();
    let mut controller = SessionController::start(
        build_exam(2, 1),
        clock,
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(2), 1).await.unwrap();

    store.fail_writes(true);
    handle.advance(Duration::seconds(1));
    assert_eq!(
        controller.tick().await.unwrap(),
        TickOutcome::Running {
            remaining_seconds: 59
        }
    );
    assert_eq!(controller.state().last_tick_at(), handle.now());

    let mut last = None;
    for _ in 0..59 {
        handle.advance(Duration::seconds(1));
        last = Some(controller.tick().await.unwrap());
    }

    assert_eq!(
        last,
        Some(TickOutcome::Expired(SubmitOutcome::Submitted(ResultId::new(1))))
    );
    assert_eq!(controller.phase(), SessionPhase::Submitted);
    assert_eq!(submitter.calls(), 1);
    assert_eq!(
        submitter.records()[0].wire_answers(),
        vec![UNANSWERED_SENTINEL, 1]
    );
}

#[tokio::test]
async fn next_and_previous_stay_within_bounds() {
    let (_handle, clock) = manual_clock();
    let mut controller = SessionController::start(
        build_exam(2, 2),
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    controller.previous().await.unwrap();
    assert_eq!(controller.state().current_index(), 0);
    controller.next().await.unwrap();
    controller.next().await.unwrap();
    assert_eq!(controller.state().current_index(), 1);
    controller.previous().await.unwrap();
    assert_eq!(controller.state().current_index(), 0);
}

#[tokio::test]
async fn complete_attempt_asks_for_confirmation() {
    let (_handle, clock) = manual_clock();
    let mut controller = SessionController::start(
        build_exam(2, 2),
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(1), 0).await.unwrap();
    controller.select_answer(qid(2), 1).await.unwrap();

    assert_eq!(controller.request_submit().unwrap(), SubmitPrompt::Confirm);
    assert_eq!(controller.phase(), SessionPhase::AwaitingConfirmation);
    assert_eq!(controller.pending_unanswered(), None);
}

#[tokio::test]
async fn incomplete_attempt_warns_with_unanswered_count() {
    let (_handle, clock) = manual_clock();
    let submitter = ScriptedSubmitter::accepting();
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(InMemorySessionStore::new()),
        submitter.clone(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(2), 1).await.unwrap();

    assert_eq!(
        controller.request_submit().unwrap(),
        SubmitPrompt::UnansweredWarning { unanswered: 2 }
    );
    assert_eq!(controller.phase(), SessionPhase::AwaitingUnansweredWarning);
    assert_eq!(controller.pending_unanswered(), Some(2));

    let err = controller.select_answer(qid(1), 0).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidPhase {
            operation: "select_answer",
            phase: SessionPhase::AwaitingUnansweredWarning,
        }
    ));
    assert_eq!(
        controller.tick().await.unwrap(),
        TickOutcome::Idle(SessionPhase::AwaitingUnansweredWarning)
    );

    controller.cancel_submit().unwrap();
    assert_eq!(controller.phase(), SessionPhase::Active);
    assert_eq!(controller.pending_unanswered(), None);
    assert_eq!(controller.state().answered_count(), 1);
    assert_eq!(submitter.calls(), 0);
}

#[tokio::test]
async fn confirm_and_cancel_require_a_pending_prompt() {
    let (_handle, clock) = manual_clock();
    let mut controller = SessionController::start(
        build_exam(1, 1),
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();

    assert!(matches!(
        controller.confirm_submit().await,
        Err(SessionError::InvalidPhase { operation: "confirm_submit", .. })
    ));
    assert!(matches!(
        controller.cancel_submit(),
        Err(SessionError::InvalidPhase { operation: "cancel_submit", .. })
    ));
    assert!(matches!(
        controller.retry().await,
        Err(SessionError::InvalidPhase { operation: "retry", .. })
    ));
}

#[tokio::test]
async fn successful_submit_clears_the_store() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let submitter = ScriptedSubmitter::accepting();
    submitter.push_success(42);
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(3), 3).await.unwrap();
    controller.toggle_flag(qid(1)).await.unwrap();

    controller.request_submit().unwrap();
    let outcome = controller.confirm_submit().await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted(ResultId::new(42)));
    assert_eq!(controller.phase(), SessionPhase::Submitted);
    assert_eq!(controller.result_id(), Some(ResultId::new(42)));
    assert!(store.read(EXAM).await.unwrap().is_none());
    assert!(store.exam_ids().unwrap().is_empty());
    assert_eq!(
        submitter.records()[0].wire_answers(),
        vec![UNANSWERED_SENTINEL, UNANSWERED_SENTINEL, 3]
    );

    assert!(matches!(
        controller.select_answer(qid(1), 0).await,
        Err(SessionError::InvalidPhase { phase: SessionPhase::Submitted, .. })
    ));
}

#[tokio::test]
async fn failed_submit_keeps_answers_for_retry() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let submitter = ScriptedSubmitter::rejecting_once();
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock.clone(),
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(1), 1).await.unwrap();
    controller.navigate(1).await.unwrap();
    let before = controller.state().fragment();

    controller.request_submit().unwrap();
    let outcome = controller.confirm_submit().await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Failed);
    assert_eq!(controller.phase(), SessionPhase::Failed);
    assert!(controller.last_error().is_some());
    assert_eq!(store.read(EXAM).await.unwrap(), Some(before.clone()));

    // A reload from the kept fragment lands back in the pre-submission state.
    let reloaded = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    assert_eq!(reloaded.phase(), SessionPhase::Active);
    assert_eq!(reloaded.state().fragment(), before);

    assert_eq!(controller.retry().await.unwrap(), None);
    assert_eq!(controller.phase(), SessionPhase::Active);
    assert!(controller.last_error().is_none());

    controller.request_submit().unwrap();
    let outcome = controller.confirm_submit().await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Submitted(ResultId::new(1)));
    assert_eq!(submitter.calls(), 2);
    assert!(store.read(EXAM).await.unwrap().is_none());
}

#[tokio::test]
async fn timeout_scenario_auto_submits_with_sentinels() {
    let (handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let submitter = ScriptedSubmitter::accepting();
    let mut controller = SessionController::start(
        build_exam(3, 1),
        clock,
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();

    controller.select_answer(qid(1), 1).await.unwrap();
    controller.navigate(2).await.unwrap();
    controller.toggle_current_flag().await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..61 {
        handle.advance(Duration::seconds(1));
        outcomes.push(controller.tick().await.unwrap());
    }

    assert_eq!(
        outcomes[58],
        TickOutcome::Running {
            remaining_seconds: 1
        }
    );
    assert_eq!(
        outcomes[59],
        TickOutcome::Expired(SubmitOutcome::Submitted(ResultId::new(1)))
    );
    assert_eq!(outcomes[60], TickOutcome::Idle(SessionPhase::Submitted));

    let records = submitter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].wire_answers(),
        vec![1, UNANSWERED_SENTINEL, UNANSWERED_SENTINEL]
    );
    assert!(store.read(EXAM).await.unwrap().is_none());
}

#[tokio::test]
async fn timeout_skips_prompts_even_when_complete() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    let mut fragment = persisted(1, 0);
    fragment.answers = BTreeMap::from([(qid(1), 0)]);
    fragment.current_index = 0;
    store.write(EXAM, &fragment).await.unwrap();
    let submitter = ScriptedSubmitter::accepting();

    let mut controller = SessionController::start(
        build_exam(1, 1),
        clock,
        Arc::new(store),
        submitter.clone(),
    )
    .await
    .unwrap();
    assert_eq!(controller.remaining_seconds(), 1);

    let outcome = controller.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Expired(SubmitOutcome::Submitted(_))));
    assert_eq!(controller.pending_unanswered(), None);
    assert_eq!(submitter.records()[0].wire_answers(), vec![0]);
}

#[tokio::test]
async fn failed_timeout_submission_retries_straight_to_submit() {
    let (_handle, clock) = manual_clock();
    let store = InMemorySessionStore::new();
    store.write(EXAM, &persisted(1, 0)).await.unwrap();
    let submitter = ScriptedSubmitter::rejecting_once();

    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(store.clone()),
        submitter.clone(),
    )
    .await
    .unwrap();

    let outcome = controller.tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Expired(SubmitOutcome::Failed));
    assert_eq!(controller.phase(), SessionPhase::Failed);

    let kept = store.read(EXAM).await.unwrap().expect("answers kept after failed timeout");
    assert_eq!(kept.remaining_seconds, 0);
    assert_eq!(kept.answers, BTreeMap::from([(qid(1), 2)]));

    let retried = controller.retry().await.unwrap();
    assert_eq!(retried, Some(SubmitOutcome::Submitted(ResultId::new(1))));
    assert_eq!(submitter.calls(), 2);
    assert_eq!(submitter.records()[0], submitter.records()[1]);
    assert_eq!(controller.last_record(), Some(&submitter.records()[1]));
    assert!(store.read(EXAM).await.unwrap().is_none());
}

#[tokio::test]
async fn submission_record_is_deterministic_and_ignores_flags() {
    let (_handle, clock) = manual_clock();
    let mut controller = SessionController::start(
        build_exam(3, 2),
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(3), 0).await.unwrap();
    controller.select_answer(qid(1), 2).await.unwrap();
    controller.toggle_flag(qid(2)).await.unwrap();

    let first = controller.state().submission_record(controller.exam());
    let second = controller.state().submission_record(controller.exam());
    assert_eq!(first, second);
    assert_eq!(first.to_json_bytes().unwrap(), second.to_json_bytes().unwrap());

    let json = String::from_utf8(first.to_json_bytes().unwrap()).unwrap();
    assert!(!json.contains("flag"));
    assert_eq!(
        json,
        r#"{"exam_id":1,"answers":[{"question_id":101,"selected_answer":2},{"question_id":102,"selected_answer":-1},{"question_id":103,"selected_answer":0}]}"#
    );
}

#[tokio::test]
async fn load_surfaces_missing_exam() {
    let (_handle, clock) = manual_clock();
    let source = StaticExams(vec![build_exam(1, 1)]);

    let err = SessionController::load(
        ExamId::new(99),
        &source,
        clock.clone(),
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SessionError::Load(_)));

    let controller = SessionController::load(
        EXAM,
        &source,
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    assert_eq!(controller.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn snapshot_describes_current_screen() {
    let (_handle, clock) = manual_clock();
    let mut controller = SessionController::start(
        build_exam(4, 5),
        clock,
        Arc::new(InMemorySessionStore::new()),
        ScriptedSubmitter::accepting(),
    )
    .await
    .unwrap();
    controller.select_answer(qid(2), 3).await.unwrap();
    controller.navigate(1).await.unwrap();
    controller.toggle_current_flag().await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.title, "Sample exam");
    assert_eq!(snapshot.current.number, 2);
    assert_eq!(snapshot.current.selected, Some(3));
    assert!(snapshot.current.flagged);
    assert_eq!(snapshot.answered_count, 1);
    assert_eq!(snapshot.unanswered_count, 3);
    assert!((snapshot.progress_percent() - 50.0).abs() < f64::EPSILON);
    assert_eq!(snapshot.time_label(), "5:00");
    assert!(!snapshot.is_low_time());
    assert!(snapshot.navigator[1].current && snapshot.navigator[1].answered);
    assert!(!snapshot.navigator[0].answered);
}
