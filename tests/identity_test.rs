//! Integration tests for duplicate-user matching and survivor selection.

use chrono::{TimeZone, Utc};
use mergebot_rs::adapter::InMemoryDesk;
use mergebot_rs::identity::{
    Candidate, IdentityMatcher, normalize_email, normalize_phone, pick_survivor, plan_merges,
};
use mergebot_rs::model::{User, UserId, UserIdentity};

fn candidate(user: User, solved: usize) -> Candidate {
    Candidate { user, solved }
}

#[test]
fn emails_are_trimmed_and_lowercased() {
    assert_eq!(normalize_email("  Sara@Example.COM "), Some("sara@example.com".to_string()));
    assert_eq!(normalize_email("   "), None);
}

#[test]
fn phones_are_reduced_to_international_form() {
    assert_eq!(normalize_phone("+966 50 123 4567"), Some("+966501234567".to_string()));
    assert_eq!(normalize_phone("00966-50-123-4567"), Some("+966501234567".to_string()));
    assert_eq!(normalize_phone("050 123 4567"), Some("+966501234567".to_string()));
    assert_eq!(normalize_phone("(415) 555-0100"), Some("4155550100".to_string()));
    assert_eq!(normalize_phone("n/a"), None);
}

#[test]
fn most_solved_tickets_wins() {
    let group = vec![
        candidate(User::new(1, "a").verified(true), 1),
        candidate(User::new(2, "b"), 3),
    ];
    assert_eq!(pick_survivor(&group).map(|c| c.user.id), Some(UserId(2)));
}

#[test]
fn verified_breaks_a_solved_tie() {
    let group = vec![
        candidate(User::new(1, "a"), 2),
        candidate(User::new(2, "b").verified(true), 2),
    ];
    assert_eq!(pick_survivor(&group).map(|c| c.user.id), Some(UserId(2)));
}

#[test]
fn oldest_account_breaks_the_remaining_tie() {
    let older = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    let newer = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let group = vec![
        candidate(User::new(1, "a").created(newer), 1),
        candidate(User::new(2, "b").created(older), 1),
        candidate(User::new(3, "c"), 1),
    ];
    assert_eq!(pick_survivor(&group).map(|c| c.user.id), Some(UserId(2)));
}

#[test]
fn merge_plan_never_reuses_a_user() {
    let groups = vec![
        vec![candidate(User::new(1, "a"), 5), candidate(User::new(2, "b"), 0)],
        // 2 is already a source; 1 is already a target
        vec![candidate(User::new(2, "b"), 0), candidate(User::new(3, "c"), 9)],
        vec![candidate(User::new(3, "c"), 9), candidate(User::new(1, "a"), 5)],
        vec![candidate(User::new(4, "d"), 1), candidate(User::new(5, "e"), 0)],
    ];

    let pairs = plan_merges(&groups);

    assert_eq!(
        pairs,
        vec![
            (UserId(2), UserId(1)),
            (UserId(5), UserId(4)),
        ]
    );
    for (source, _) in &pairs {
        assert!(pairs.iter().all(|(_, target)| target != source));
    }
}

#[tokio::test]
async fn duplicates_are_found_by_exact_email_or_phone() {
    let desk = InMemoryDesk::new();
    desk.add_user(User::new(1, "Sara").email("Sara@Example.com").phone("0501234567"));
    desk.add_user(User::new(2, "Sara K").email("sara@example.com"));
    desk.add_user(User::new(3, "Sara Mobile").phone("+966 50 123 4567"));
    desk.add_user(User::new(4, "Agent Sara").email("sara@example.com").role("agent"));
    desk.add_user(User::new(5, "Someone else").email("other@example.com"));
    desk.add_user(User::new(6, "Work mail").email("sara@work.example"));
    desk.add_identity(1, UserIdentity {
        kind: "email".to_string(),
        value: "SARA@work.example".to_string(),
    });

    let matcher = IdentityMatcher::new(&desk);
    let requester = User::new(1, "Sara").email("Sara@Example.com").phone("0501234567");
    let group = matcher.duplicates_of(&requester).await.unwrap();

    let ids: Vec<_> = group.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![UserId(1), UserId(2), UserId(3), UserId(6)]);
}
