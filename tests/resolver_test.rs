//! Integration tests for parent resolution.

use chrono::{DateTime, Duration, TimeZone, Utc};
use mergebot_rs::adapter::InMemoryDesk;
use mergebot_rs::adapter::memory::Failpoint;
use mergebot_rs::context::RunContext;
use mergebot_rs::model::{AuditEvent, SideConversation, Ticket, TicketId, Via};
use mergebot_rs::resolver::{ParentResolver, ReverseMatch, Resolution, Strategy};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
}

fn days_ago(days: i64) -> DateTime<Utc> {
    now() - Duration::days(days)
}

fn resolver(desk: &InMemoryDesk) -> ParentResolver<'_, InMemoryDesk> {
    ParentResolver::new(desk, now(), 90, ReverseMatch::Earliest)
}

fn creation_audit(via: Via) -> AuditEvent {
    AuditEvent {
        audit_id: 1,
        kind: "Create".to_string(),
        via: Some(via),
        public: None,
        body: None,
        author_id: None,
        created_at: days_ago(1),
    }
}

fn targeting(child: u64) -> SideConversation {
    SideConversation {
        id: format!("sc-{child}"),
        subject: Some("Courier follow-up".to_string()),
        target_ticket_id: Some(TicketId(child)),
        created_at: None,
    }
}

/// A plain child with no origin link of its own.
fn orphan(id: u64) -> Ticket {
    Ticket::new(id, 9, "Courier follow-up", days_ago(1))
}

#[tokio::test]
async fn via_link_resolves_without_further_calls() {
    let desk = InMemoryDesk::new();
    let child = orphan(42).via(Via::side_conversation_from(TicketId(500)));
    desk.add_ticket(child.clone());

    let mut ctx = RunContext::new();
    let parent = resolver(&desk).resolve_parent(&mut ctx, &child).await;

    assert_eq!(parent, Some(TicketId(500)));
    assert_eq!(desk.calls("get_ticket_audits"), 0);
    assert_eq!(desk.calls("list_tickets"), 0);
}

#[tokio::test]
async fn creation_audit_is_the_second_strategy() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    desk.add_ticket(child.clone());
    desk.add_audit(42, creation_audit(Via::side_conversation_from(TicketId(321))));

    let mut ctx = RunContext::new();
    let resolution = resolver(&desk).resolve(&mut ctx, &child).await;

    assert_eq!(
        resolution,
        Resolution::Found {
            parent: TicketId(321),
            strategy: Strategy::Audit,
        }
    );
    assert_eq!(desk.calls("list_tickets"), 0);
}

#[tokio::test]
async fn non_creation_audits_are_ignored() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    let mut change = creation_audit(Via::side_conversation_from(TicketId(321)));
    change.kind = "Change".to_string();
    desk.add_audit(42, change);

    let mut ctx = RunContext::new();
    assert_eq!(resolver(&desk).resolve_parent(&mut ctx, &child).await, None);
}

#[tokio::test]
async fn reverse_search_finds_the_parent_that_opened_the_conversation() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    desk.add_ticket(child.clone());
    desk.add_ticket(Ticket::new(700, 3, "Delivery issue", days_ago(2)));
    desk.add_side_conversation(700, targeting(42));

    let mut ctx = RunContext::new();
    let resolution = resolver(&desk).resolve(&mut ctx, &child).await;

    assert_eq!(
        resolution,
        Resolution::Found {
            parent: TicketId(700),
            strategy: Strategy::ReverseSearch,
        }
    );
    assert!(ctx.reverse_index_built());
}

#[tokio::test]
async fn direct_link_beats_reverse_search() {
    let desk = InMemoryDesk::new();
    let child = orphan(42).via(Via::side_conversation_from(TicketId(500)));
    desk.add_ticket(child.clone());
    desk.add_ticket(Ticket::new(700, 3, "Delivery issue", days_ago(2)));
    desk.add_side_conversation(700, targeting(42));

    let mut ctx = RunContext::new();
    assert_eq!(
        resolver(&desk).resolve_parent(&mut ctx, &child).await,
        Some(TicketId(500))
    );
    assert!(!ctx.reverse_index_built());
}

#[tokio::test]
async fn self_references_are_never_returned() {
    let desk = InMemoryDesk::new();
    let child = orphan(42).via(Via::side_conversation_from(TicketId(42)));
    desk.add_ticket(child.clone());
    desk.add_audit(42, creation_audit(Via::side_conversation_from(TicketId(42))));
    desk.add_side_conversation(42, targeting(42));

    let mut ctx = RunContext::new();
    let resolution = resolver(&desk).resolve(&mut ctx, &child).await;
    assert_eq!(resolution, Resolution::NotFound);
}

#[tokio::test]
async fn self_loop_falls_through_to_the_next_strategy() {
    let desk = InMemoryDesk::new();
    let child = orphan(42).via(Via::side_conversation_from(TicketId(42)));
    desk.add_audit(42, creation_audit(Via::side_conversation_from(TicketId(321))));

    let mut ctx = RunContext::new();
    assert_eq!(
        resolver(&desk).resolve_parent(&mut ctx, &child).await,
        Some(TicketId(321))
    );
}

#[tokio::test]
async fn reverse_index_is_built_once_per_run() {
    let desk = InMemoryDesk::new();
    for id in [41, 42, 43] {
        desk.add_ticket(orphan(id));
    }
    desk.add_ticket(Ticket::new(700, 3, "Delivery issue", days_ago(2)));
    desk.add_side_conversation(700, targeting(41));
    desk.add_side_conversation(700, targeting(42));

    let resolver = resolver(&desk);
    let mut ctx = RunContext::new();
    let first = resolver.resolve_parent(&mut ctx, &orphan(41)).await;
    let second = resolver.resolve_parent(&mut ctx, &orphan(42)).await;
    let third = resolver.resolve_parent(&mut ctx, &orphan(43)).await;

    assert_eq!(first, Some(TicketId(700)));
    assert_eq!(second, Some(TicketId(700)));
    assert_eq!(third, None);
    assert_eq!(desk.calls("list_tickets"), 1);
}

#[tokio::test]
async fn repeated_resolution_is_served_from_the_run_cache() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    desk.add_ticket(Ticket::new(700, 3, "Delivery issue", days_ago(2)));
    desk.add_side_conversation(700, targeting(42));

    let resolver = resolver(&desk);
    let mut ctx = RunContext::new();
    let first = resolver.resolve(&mut ctx, &child).await;
    let audits_after_first = desk.calls("get_ticket_audits");
    let second = resolver.resolve(&mut ctx, &child).await;

    assert_eq!(first, second);
    assert_eq!(ctx.cached_resolution(TicketId(42)), Some(first));
    assert_eq!(desk.calls("get_ticket_audits"), audits_after_first);
}

#[tokio::test]
async fn failing_strategies_count_as_misses() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    desk.add_ticket(Ticket::new(700, 3, "Delivery issue", days_ago(2)));
    desk.add_side_conversation(700, targeting(42));
    desk.fail(Failpoint::Audits(TicketId(42)));

    let mut ctx = RunContext::new();
    assert_eq!(
        resolver(&desk).resolve_parent(&mut ctx, &child).await,
        Some(TicketId(700))
    );

    let desk = InMemoryDesk::new();
    desk.fail(Failpoint::ListTickets);
    let mut ctx = RunContext::new();
    assert_eq!(resolver(&desk).resolve_parent(&mut ctx, &child).await, None);
}

#[tokio::test]
async fn unreadable_candidates_are_skipped_during_reverse_search() {
    let desk = InMemoryDesk::new();
    let child = orphan(42);
    desk.add_ticket(Ticket::new(600, 3, "Older", days_ago(5)));
    desk.add_ticket(Ticket::new(700, 3, "Newer", days_ago(2)));
    desk.add_side_conversation(600, targeting(42));
    desk.add_side_conversation(700, targeting(42));
    desk.fail(Failpoint::SideConversations(TicketId(600)));

    let mut ctx = RunContext::new();
    assert_eq!(
        resolver(&desk).resolve_parent(&mut ctx, &child).await,
        Some(TicketId(700))
    );
}

#[tokio::test]
async fn reverse_match_policy_breaks_ties() {
    let setup = || {
        let desk = InMemoryDesk::new();
        desk.add_ticket(Ticket::new(800, 3, "Newer", days_ago(3)));
        desk.add_ticket(Ticket::new(700, 3, "Older", days_ago(10)));
        desk.add_side_conversation(800, targeting(42));
        desk.add_side_conversation(700, targeting(42));
        desk
    };

    let desk = setup();
    let mut ctx = RunContext::new();
    let earliest = ParentResolver::new(&desk, now(), 90, ReverseMatch::Earliest)
        .resolve_parent(&mut ctx, &orphan(42))
        .await;
    assert_eq!(earliest, Some(TicketId(700)));

    let desk = setup();
    let mut ctx = RunContext::new();
    let latest = ParentResolver::new(&desk, now(), 90, ReverseMatch::Latest)
        .resolve_parent(&mut ctx, &orphan(42))
        .await;
    assert_eq!(latest, Some(TicketId(800)));
}

#[tokio::test]
async fn reverse_search_respects_the_lookback() {
    let desk = InMemoryDesk::new();
    desk.add_ticket(Ticket::new(700, 3, "Ancient", days_ago(120)));
    desk.add_side_conversation(700, targeting(42));

    let mut ctx = RunContext::new();
    assert_eq!(resolver(&desk).resolve_parent(&mut ctx, &orphan(42)).await, None);

    let mut ctx = RunContext::new();
    let wide = ParentResolver::new(&desk, now(), 180, ReverseMatch::Earliest);
    assert_eq!(wide.resolve_parent(&mut ctx, &orphan(42)).await, Some(TicketId(700)));
}

#[tokio::test]
async fn resolve_by_id_fetches_the_child_first() {
    let desk = InMemoryDesk::new();
    desk.add_ticket(orphan(42).via(Via::side_conversation_from(TicketId(500))));

    let mut ctx = RunContext::new();
    let resolver = resolver(&desk);
    assert_eq!(resolver.resolve_parent_of(&mut ctx, TicketId(42)).await.parent(), Some(TicketId(500)));
    assert_eq!(resolver.resolve_parent_of(&mut ctx, TicketId(99)).await, Resolution::NotFound);
}
