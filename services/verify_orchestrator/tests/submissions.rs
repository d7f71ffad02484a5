mod common;

use common::{submission, FakeProbe, FakeRuntime, Harness};
use solana_sdk::pubkey::Pubkey;
use sol_verify_orchestrator::DispatchOutcome;
use sol_verify_sdk::codes;

#[tokio::test]
async fn test_missing_target_reports_once_and_creates_no_job() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    let target = Pubkey::new_unique();
    harness
        .ledger
        .push_submission(&harness.program_id, &submitter, submission(target, "4f2a9c1e"));

    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.submissions, 1);
    assert!(report.dispatched.is_empty());

    let updates = harness.ledger.sent_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status_code, codes::PROGRAM_DOESNT_EXIST);
    assert_eq!(updates[0].address, submitter.to_bytes());
    assert!(updates[0]
        .log_message
        .starts_with(&format!("Program {target} : ")));

    assert!(poller.jobs().is_empty());
    assert!(harness.runtime.built().is_empty());
    // later checks never ran
    assert!(harness.probe.calls().is_empty());
}

#[tokio::test]
async fn test_duplicate_submission_is_dropped_without_chain_write() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    harness.submit(&submitter);
    let first = poller.poll_once().await.unwrap();
    assert_eq!(first.dispatched, vec![DispatchOutcome::Started { slot: 0 }]);
    let writes_after_first = harness.ledger.sent_updates().len();
    assert_eq!(harness.ledger.sent_codes(), vec![codes::IN_PROGRESS]);

    harness.submit(&submitter);
    let second = poller.poll_once().await.unwrap();
    assert_eq!(second.dispatched, vec![DispatchOutcome::Duplicate]);

    assert_eq!(harness.ledger.sent_updates().len(), writes_after_first);
    assert_eq!(poller.jobs().len(), 1);
    assert_eq!(harness.runtime.started(), vec![0]);
}

#[tokio::test]
async fn test_duplicates_within_one_batch() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    let other = Pubkey::new_unique();
    harness.submit(&submitter);
    harness.submit(&submitter);
    harness.submit(&other);

    let report = poller.poll_once().await.unwrap();
    assert_eq!(
        report.dispatched,
        vec![
            DispatchOutcome::Started { slot: 0 },
            DispatchOutcome::Duplicate,
            DispatchOutcome::Started { slot: 1 },
        ]
    );
    assert_eq!(poller.jobs().len(), 2);
}

#[tokio::test]
async fn test_generated_script_checks_commit_before_building() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    let target = Pubkey::new_unique();
    harness.ledger.add_program(target);
    harness.ledger.push_submission(
        &harness.program_id,
        &submitter,
        submission(target, "0000000000000000000000000000000000000000"),
    );
    poller.poll_once().await.unwrap();

    let script = std::fs::read_to_string(harness.jobs_dir().join("job-0/run.sh")).unwrap();
    let check = script
        .find("cat-file -e '0000000000000000000000000000000000000000^{commit}'")
        .expect("commit check present");
    let build = script.find("$BUILD_CMD").expect("build step present");
    assert!(check < build);

    let guard = &script[check..build];
    let report = guard.find(&format!("report {} ", codes::GIT_COMMIT_DOESNT_EXIST)).unwrap();
    assert!(guard[report..].contains("exit 1"));

    let context = harness.jobs_dir().join("job-0");
    assert!(context.join("Dockerfile").exists());
    // the key only lives in the built image
    assert!(!context.join("id.json").exists());
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(context.join("job.json")).unwrap()).unwrap();
    assert_eq!(manifest["slot"], 0);
    assert_eq!(manifest["submitter"], submitter.to_string());
}

#[tokio::test]
async fn test_unreachable_archive_is_rejected() {
    let harness = Harness::with(FakeProbe::new(true, false), FakeRuntime::new());
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    let target = Pubkey::new_unique();
    harness.ledger.add_program(target);
    let mut meta = submission(target, "");
    meta.git_repo = "https://example.com/source.zip".to_string();
    harness.ledger.push_submission(&harness.program_id, &submitter, meta);

    poller.poll_once().await.unwrap();

    assert_eq!(harness.ledger.sent_codes(), vec![codes::GIT_REPO_DOESNT_EXIST]);
    assert_eq!(harness.probe.calls(), vec!["head https://example.com/source.zip".to_string()]);
    assert!(poller.jobs().is_empty());
}

#[tokio::test]
async fn test_missing_repo_is_rejected() {
    let harness = Harness::with(FakeProbe::new(false, true), FakeRuntime::new());
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    harness.submit(&Pubkey::new_unique());
    poller.poll_once().await.unwrap();

    assert_eq!(harness.ledger.sent_codes(), vec![codes::GIT_REPO_DOESNT_EXIST]);
    assert!(harness.runtime.built().is_empty());
}

#[tokio::test]
async fn test_unknown_preset_starts_no_container() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    let target = Pubkey::new_unique();
    harness.ledger.add_program(target);
    let mut meta = submission(target, "4f2a9c1e");
    meta.docker_version = "solana_v0.0".to_string();
    harness.ledger.push_submission(&harness.program_id, &submitter, meta);

    poller.poll_once().await.unwrap();

    assert_eq!(harness.ledger.sent_codes(), vec![codes::DOCKER_DOESNT_EXIST]);
    assert!(harness.runtime.built().is_empty());
    assert!(harness.runtime.started().is_empty());
    assert!(poller.jobs().is_empty());
}

#[tokio::test]
async fn test_image_build_failure_is_reported() {
    let harness = Harness::with(FakeProbe::new(true, true), FakeRuntime::failing());
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let submitter = Pubkey::new_unique();
    harness.submit(&submitter);
    let report = poller.poll_once().await.unwrap();

    assert_eq!(report.dispatched, vec![DispatchOutcome::Failed { slot: 0 }]);
    assert_eq!(
        harness.ledger.sent_codes(),
        vec![codes::IN_PROGRESS, codes::DOCKER_BUILD_FAILED]
    );
    assert!(poller.jobs().is_empty());
    assert_eq!(harness.runtime.stopped(), vec![0]);
    assert!(!harness.jobs_dir().join("job-0").exists());

    // the submitter may try again and gets a fresh slot
    harness.submit(&submitter);
    let retry = poller.poll_once().await.unwrap();
    assert_eq!(retry.dispatched, vec![DispatchOutcome::Failed { slot: 1 }]);
}

#[tokio::test]
async fn test_unreadable_target_is_retried_not_rejected() {
    let harness = Harness::new();
    let mut poller = harness.poller(100);
    poller.initialise_cursor().await.unwrap();

    let (_, first) = harness.submit(&Pubkey::new_unique());
    let submitter = Pubkey::new_unique();
    let (target, _) = harness.submit(&submitter);
    harness.ledger.fail_account_reads(target, true);

    assert!(poller.poll_once().await.is_err());
    // the first submission was handled, the second was left alone
    assert_eq!(poller.cursor(), Some(first));
    assert_eq!(harness.ledger.sent_codes(), vec![codes::IN_PROGRESS]);
    assert!(!poller.jobs().is_active(&submitter));

    harness.ledger.fail_account_reads(target, false);
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.signatures, 1);
    assert_eq!(report.dispatched, vec![DispatchOutcome::Started { slot: 1 }]);
    assert_eq!(
        harness.ledger.sent_codes(),
        vec![codes::IN_PROGRESS, codes::IN_PROGRESS]
    );
    assert!(poller.jobs().is_active(&submitter));
}
