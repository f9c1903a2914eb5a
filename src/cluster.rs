//! Duplicate-ticket clustering.
//!
//! Tickets are bucketed by a grouping key: side-conversation tickets by
//! subject alone, everything else by (requester, subject, channel). In each
//! bucket the oldest ticket survives and the rest fold into it, unless the
//! survivor is closed or archived, in which case the bucket is left alone.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::adapter::UserDirectory;
use crate::context::RunContext;
use crate::model::ticket::SIDE_CONVERSATION;
use crate::model::{Ticket, TicketId, TicketStatus, UserId};

// ---------------------------------------------------------------------------
// Subject normalisation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectNormalizer {
    /// Trim and lowercase.
    #[default]
    Basic,
    /// Basic, then drop reply/forward markers and ticket-number prefixes,
    /// collapse whitespace and trailing punctuation.
    StripPrefixes,
}

const REPLY_MARKERS: [&str; 3] = ["re:", "fwd:", "fw:"];

impl SubjectNormalizer {
    pub fn normalize(self, subject: &str) -> String {
        let basic = subject.trim().to_lowercase();
        match self {
            SubjectNormalizer::Basic => basic,
            SubjectNormalizer::StripPrefixes => strip_prefixes(&basic),
        }
    }
}

fn strip_prefixes(subject: &str) -> String {
    let mut rest = subject.trim();
    loop {
        let before = rest;
        for marker in REPLY_MARKERS {
            if let Some(stripped) = rest.strip_prefix(marker) {
                rest = stripped.trim_start();
            }
        }
        rest = strip_ticket_number(rest).trim_start();
        if rest == before {
            break;
        }
    }
    let collapsed = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?', ':', ';', ',', '-'])
        .trim_end()
        .to_string()
}

/// Drop a leading `#1234`, `[#1234]` or `ticket #1234` token.
fn strip_ticket_number(input: &str) -> &str {
    let s = input.strip_prefix("ticket").map_or(input, str::trim_start);
    let (bracketed, s) = match s.strip_prefix('[') {
        Some(inner) => (true, inner),
        None => (false, s),
    };
    let Some(after_hash) = s.strip_prefix('#') else {
        return input;
    };
    let number_end = after_hash
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_hash.len());
    if number_end == 0 {
        return input;
    }
    let mut rest = &after_hash[number_end..];
    if bracketed {
        match rest.strip_prefix(']') {
            Some(r) => rest = r,
            None => return input,
        }
    }
    rest.trim_start()
        .trim_start_matches([':', '-'])
        .trim_start()
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// Channels and requester organisations the merge pass never touches.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    /// Lowercased channel tags.
    pub channels: BTreeSet<String>,
    /// Lowercased organisation domains.
    pub org_domains: BTreeSet<String>,
}

impl ExclusionPolicy {
    pub fn excludes_channel(&self, channel: &str) -> bool {
        self.channels.contains(&channel.to_lowercase())
    }

    pub fn excluded_domain<'a>(&self, domains: &'a BTreeSet<String>) -> Option<&'a str> {
        domains
            .iter()
            .find(|d| self.org_domains.contains(d.as_str()))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    SideConversation {
        subject: String,
    },
    Requester {
        requester: UserId,
        subject: String,
        channel: String,
    },
}

impl GroupKey {
    pub fn for_ticket(ticket: &Ticket, normalizer: SubjectNormalizer) -> Self {
        let subject = normalizer.normalize(ticket.subject());
        let channel = ticket.channel();
        if channel == SIDE_CONVERSATION {
            GroupKey::SideConversation { subject }
        } else {
            GroupKey::Requester {
                requester: ticket.requester_id,
                subject,
                channel,
            }
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::SideConversation { subject } => {
                write!(f, "side_conversation subject={subject:?}")
            }
            GroupKey::Requester {
                requester,
                subject,
                channel,
            } => write!(f, "requester={requester} subject={subject:?} channel={channel}"),
        }
    }
}

/// What should happen to a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterDecision {
    /// Nothing to merge.
    Single,
    Merge {
        target: TicketId,
        sources: Vec<TicketId>,
    },
    /// The survivor cannot receive merges.
    Vetoed {
        survivor: TicketId,
        status: TicketStatus,
    },
}

/// Tickets sharing a grouping key, oldest first.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub key: GroupKey,
    pub tickets: Vec<Ticket>,
}

impl Cluster {
    /// The oldest ticket. Ties on creation time go to the lower id.
    pub fn survivor(&self) -> &Ticket {
        &self.tickets[0]
    }

    pub fn member_ids(&self) -> Vec<TicketId> {
        self.tickets.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn decision(&self) -> ClusterDecision {
        if self.tickets.len() < 2 {
            return ClusterDecision::Single;
        }
        let survivor = self.survivor();
        if survivor.status.blocks_merge() {
            return ClusterDecision::Vetoed {
                survivor: survivor.id,
                status: survivor.status,
            };
        }
        ClusterDecision::Merge {
            target: survivor.id,
            sources: self.tickets[1..].iter().map(|t| t.id).collect(),
        }
    }
}

/// Partition tickets by grouping key. Pure; repeated ids are kept once.
///
/// Clusters come back in order of first appearance.
pub fn group(tickets: Vec<Ticket>, normalizer: SubjectNormalizer) -> Vec<Cluster> {
    let mut seen = HashSet::new();
    let mut slots: HashMap<GroupKey, usize> = HashMap::new();
    let mut clusters: Vec<Cluster> = Vec::new();

    for ticket in tickets {
        if !seen.insert(ticket.id) {
            continue;
        }
        let key = GroupKey::for_ticket(&ticket, normalizer);
        debug!(ticket = %ticket.id, %key, "grouped");
        match slots.get(&key) {
            Some(&slot) => clusters[slot].tickets.push(ticket),
            None => {
                slots.insert(key.clone(), clusters.len());
                clusters.push(Cluster {
                    key,
                    tickets: vec![ticket],
                });
            }
        }
    }

    for cluster in &mut clusters {
        cluster.tickets.sort_by_key(|t| (t.created_at, t.id));
    }
    clusters
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Exclusion filtering plus grouping for one batch.
#[derive(Debug, Default)]
pub struct ClusterPlan {
    pub clusters: Vec<Cluster>,
    /// Tickets dropped by policy, with the rule that matched.
    pub excluded: Vec<(TicketId, String)>,
    /// Tickets dropped because their requester's organisation could not be checked.
    pub unverified: Vec<(TicketId, String)>,
}

pub struct ClusteringEngine<'a, D: ?Sized> {
    directory: &'a D,
    normalizer: SubjectNormalizer,
}

impl<'a, D> ClusteringEngine<'a, D>
where
    D: UserDirectory + ?Sized,
{
    pub fn new(directory: &'a D, normalizer: SubjectNormalizer) -> Self {
        Self {
            directory,
            normalizer,
        }
    }

    pub async fn cluster(
        &self,
        ctx: &mut RunContext,
        tickets: Vec<Ticket>,
        exclusions: &ExclusionPolicy,
    ) -> ClusterPlan {
        let mut plan = ClusterPlan::default();
        let mut kept = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            let channel = ticket.channel();
            if exclusions.excludes_channel(&channel) {
                debug!(ticket = %ticket.id, %channel, "excluded channel");
                plan.excluded.push((ticket.id, format!("channel {channel}")));
                continue;
            }
            if !exclusions.org_domains.is_empty() {
                match self.requester_domains(ctx, ticket.requester_id).await {
                    Some(domains) => {
                        if let Some(domain) = exclusions.excluded_domain(&domains) {
                            debug!(ticket = %ticket.id, domain, "excluded organisation");
                            plan.excluded.push((ticket.id, format!("organisation domain {domain}")));
                            continue;
                        }
                    }
                    None => {
                        plan.unverified.push((
                            ticket.id,
                            format!("organisation of requester {} unavailable", ticket.requester_id),
                        ));
                        continue;
                    }
                }
            }
            kept.push(ticket);
        }

        plan.clusters = group(kept, self.normalizer);
        plan
    }

    /// Organisation domains of a requester, looked up once per run.
    async fn requester_domains(
        &self,
        ctx: &mut RunContext,
        requester: UserId,
    ) -> Option<BTreeSet<String>> {
        if let Some(cached) = ctx.requester_domains.get(&requester) {
            return cached.clone();
        }
        let domains = match self.directory.get_user(requester).await {
            Ok(Some(user)) => match user.organization_id {
                Some(org_id) => match self.directory.get_organization_domains(org_id).await {
                    Ok(domains) => Some(domains),
                    Err(e) => {
                        warn!(%requester, org_id, error = %e, "organisation lookup failed");
                        None
                    }
                },
                None => Some(BTreeSet::new()),
            },
            Ok(None) => Some(BTreeSet::new()),
            Err(e) => {
                warn!(%requester, error = %e, "requester lookup failed");
                None
            }
        };
        ctx.requester_domains.insert(requester, domains.clone());
        domains
    }
}
