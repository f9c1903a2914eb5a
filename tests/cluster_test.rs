//! Integration tests for duplicate-ticket clustering.

use chrono::{DateTime, Duration, TimeZone, Utc};
use mergebot_rs::adapter::InMemoryDesk;
use mergebot_rs::adapter::memory::Failpoint;
use mergebot_rs::cluster::{
    ClusterDecision, ClusteringEngine, ExclusionPolicy, GroupKey, SubjectNormalizer, group,
};
use mergebot_rs::context::RunContext;
use mergebot_rs::model::{Ticket, TicketId, TicketStatus, User, UserId, Via};
use std::collections::{BTreeSet, HashSet};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

fn exclusions(channels: &[&str], domains: &[&str]) -> ExclusionPolicy {
    ExclusionPolicy {
        channels: channels.iter().map(|c| c.to_string()).collect(),
        org_domains: domains.iter().map(|d| d.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Subject normalisation
// ---------------------------------------------------------------------------

#[test]
fn basic_normalizer_trims_and_lowercases() {
    assert_eq!(SubjectNormalizer::Basic.normalize("  Order LATE \n"), "order late");
    assert_eq!(SubjectNormalizer::Basic.normalize("Re: Order late"), "re: order late");
}

#[test]
fn strip_prefixes_drops_reply_markers_and_ticket_numbers() {
    let n = SubjectNormalizer::StripPrefixes;
    assert_eq!(n.normalize("Re: Fwd: Order late"), "order late");
    assert_eq!(n.normalize("RE: [#4411] Order   late!!"), "order late");
    assert_eq!(n.normalize("#4411 - Order late."), "order late");
    assert_eq!(n.normalize("Ticket #12: order late"), "order late");
    assert_eq!(n.normalize("order #5 missing"), "order #5 missing");
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[test]
fn same_requester_subject_and_channel_form_one_cluster() {
    let tickets = vec![
        Ticket::new(1, 9, "X", at(0)),
        Ticket::new(2, 9, "x ", at(5)),
    ];

    let clusters = group(tickets, SubjectNormalizer::Basic);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].member_ids(), vec![TicketId(1), TicketId(2)]);
    assert_eq!(clusters[0].survivor().id, TicketId(1));
    assert_eq!(
        clusters[0].decision(),
        ClusterDecision::Merge {
            target: TicketId(1),
            sources: vec![TicketId(2)],
        }
    );
}

#[test]
fn closed_survivor_vetoes_the_whole_cluster() {
    let tickets = vec![
        Ticket::new(1, 9, "X", at(0)).status(TicketStatus::Closed),
        Ticket::new(2, 9, "x", at(5)),
        Ticket::new(3, 9, "x", at(9)),
    ];

    let clusters = group(tickets, SubjectNormalizer::Basic);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 3);
    assert_eq!(
        clusters[0].decision(),
        ClusterDecision::Vetoed {
            survivor: TicketId(1),
            status: TicketStatus::Closed,
        }
    );
}

#[test]
fn archived_survivor_is_vetoed_but_a_closed_member_is_not() {
    let archived = group(
        vec![
            Ticket::new(1, 9, "x", at(0)).status(TicketStatus::Archived),
            Ticket::new(2, 9, "x", at(1)),
        ],
        SubjectNormalizer::Basic,
    );
    assert!(matches!(archived[0].decision(), ClusterDecision::Vetoed { .. }));

    let closed_member = group(
        vec![
            Ticket::new(1, 9, "x", at(0)),
            Ticket::new(2, 9, "x", at(1)).status(TicketStatus::Closed),
        ],
        SubjectNormalizer::Basic,
    );
    assert!(matches!(closed_member[0].decision(), ClusterDecision::Merge { .. }));
}

#[test]
fn survivor_is_oldest_regardless_of_input_order() {
    let tickets = vec![
        Ticket::new(30, 4, "refund", at(30)),
        Ticket::new(10, 4, "refund", at(-60)),
        Ticket::new(20, 4, "Refund", at(15)),
    ];

    let clusters = group(tickets, SubjectNormalizer::Basic);
    let cluster = &clusters[0];
    let survivor = cluster.survivor();
    assert_eq!(survivor.id, TicketId(10));
    assert!(cluster.tickets.iter().all(|t| survivor.created_at <= t.created_at));
}

#[test]
fn creation_ties_go_to_the_lower_id() {
    let clusters = group(
        vec![Ticket::new(8, 4, "x", at(0)), Ticket::new(7, 4, "x", at(0))],
        SubjectNormalizer::Basic,
    );
    assert_eq!(clusters[0].survivor().id, TicketId(7));
}

#[test]
fn different_requesters_or_channels_stay_apart() {
    let tickets = vec![
        Ticket::new(1, 9, "x", at(0)),
        Ticket::new(2, 8, "x", at(1)),
        Ticket::new(3, 9, "x", at(2)).via(Via::channel("web")),
    ];

    let clusters = group(tickets, SubjectNormalizer::Basic);
    assert_eq!(clusters.len(), 3);
    assert!(clusters.iter().all(|c| c.decision() == ClusterDecision::Single));
}

#[test]
fn side_conversation_tickets_group_by_subject_alone() {
    let sc = || Via::channel("side_conversation");
    let tickets = vec![
        Ticket::new(1, 9, "Courier pickup", at(0)).via(sc()),
        Ticket::new(2, 77, "courier pickup", at(3)).via(sc()),
        Ticket::new(3, 9, "courier pickup", at(4)),
    ];

    let clusters = group(tickets, SubjectNormalizer::Basic);
    assert_eq!(clusters.len(), 2);
    assert_eq!(
        clusters[0].key,
        GroupKey::SideConversation {
            subject: "courier pickup".to_string()
        }
    );
    assert_eq!(clusters[0].member_ids(), vec![TicketId(1), TicketId(2)]);
    assert_eq!(
        clusters[1].key,
        GroupKey::Requester {
            requester: UserId(9),
            subject: "courier pickup".to_string(),
            channel: "email".to_string(),
        }
    );
}

#[test]
fn grouping_is_a_partition_of_the_input() {
    let mut tickets = Vec::new();
    for id in 1..=40u64 {
        let requester = id % 5;
        let subject = ["late", "refund", "LATE ", "damaged"][(id % 4) as usize];
        let mut t = Ticket::new(id, requester, subject, at((id * 7 % 13) as i64));
        if id % 6 == 0 {
            t = t.via(Via::channel("side_conversation"));
        }
        tickets.push(t);
    }
    // a repeated record from overlapping pages
    tickets.push(Ticket::new(3, 3, "late", at(100)));

    let clusters = group(tickets, SubjectNormalizer::Basic);

    let mut seen = HashSet::new();
    for cluster in &clusters {
        assert!(!cluster.is_empty());
        for id in cluster.member_ids() {
            assert!(seen.insert(id), "ticket {id} appears in two clusters");
        }
    }
    let expected: HashSet<_> = (1..=40).map(TicketId).collect();
    assert_eq!(seen, expected);
}

#[test]
fn strip_prefixes_merges_reply_threads() {
    let tickets = vec![
        Ticket::new(1, 9, "Order late", at(0)),
        Ticket::new(2, 9, "Re: order late", at(1)),
    ];
    assert_eq!(group(tickets.clone(), SubjectNormalizer::Basic).len(), 2);
    assert_eq!(group(tickets, SubjectNormalizer::StripPrefixes).len(), 1);
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn excluded_channels_are_dropped_before_grouping() {
    let desk = InMemoryDesk::new();
    let engine = ClusteringEngine::new(&desk, SubjectNormalizer::Basic);
    let mut ctx = RunContext::new();

    let tickets = vec![
        Ticket::new(1, 9, "x", at(0)).via(Via::channel("WhatsApp")),
        Ticket::new(2, 9, "x", at(1)).via(Via::channel("whatsapp")),
        Ticket::new(3, 9, "x", at(2)),
    ];
    let plan = engine
        .cluster(&mut ctx, tickets, &exclusions(&["whatsapp", "any_channel"], &[]))
        .await;

    let excluded: Vec<_> = plan.excluded.iter().map(|(id, _)| *id).collect();
    assert_eq!(excluded, vec![TicketId(1), TicketId(2)]);
    assert_eq!(plan.clusters.len(), 1);
    assert_eq!(plan.clusters[0].member_ids(), vec![TicketId(3)]);
    // no org policy, no directory traffic
    assert_eq!(desk.calls("get_user"), 0);
}

#[tokio::test]
async fn excluded_org_domains_are_looked_up_once_per_requester() {
    let desk = InMemoryDesk::new();
    desk.add_organization(500, &["Partner.example"]);
    desk.add_user(User::new(9, "Partner Buyer").organization(500));
    desk.add_user(User::new(4, "Retail Buyer"));

    let tickets = vec![
        Ticket::new(1, 9, "x", at(0)),
        Ticket::new(2, 9, "x", at(1)),
        Ticket::new(3, 4, "x", at(2)),
        Ticket::new(4, 4, "x", at(3)),
        Ticket::new(5, 4, "y", at(4)),
    ];

    let engine = ClusteringEngine::new(&desk, SubjectNormalizer::Basic);
    let mut ctx = RunContext::new();
    let plan = engine
        .cluster(&mut ctx, tickets, &exclusions(&[], &["partner.example"]))
        .await;

    let excluded: BTreeSet<_> = plan.excluded.iter().map(|(id, _)| *id).collect();
    assert_eq!(excluded, BTreeSet::from([TicketId(1), TicketId(2)]));
    assert!(plan.excluded[0].1.contains("partner.example"));
    assert_eq!(plan.clusters.len(), 2);
    assert_eq!(desk.calls("get_user"), 2);
    assert_eq!(desk.calls("get_organization_domains"), 1);
}

#[tokio::test]
async fn unverifiable_requesters_are_held_back() {
    let desk = InMemoryDesk::new();
    desk.add_user(User::new(9, "Someone"));
    desk.fail(Failpoint::GetUser(UserId(9)));

    let engine = ClusteringEngine::new(&desk, SubjectNormalizer::Basic);
    let mut ctx = RunContext::new();
    let plan = engine
        .cluster(
            &mut ctx,
            vec![Ticket::new(1, 9, "x", at(0)), Ticket::new(2, 9, "x", at(1))],
            &exclusions(&[], &["partner.example"]),
        )
        .await;

    assert!(plan.clusters.is_empty());
    assert_eq!(plan.unverified.len(), 2);
    assert!(plan.excluded.is_empty());
    // the failed lookup is not repeated for the second ticket
    assert_eq!(desk.calls("get_user"), 1);
}
