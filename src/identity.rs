//! Duplicate end-user detection.
//!
//! Requesters are matched to other end-user profiles through normalised
//! emails and phone numbers. Within a group the survivor is the user with
//! the most solved tickets in the window, then a verified profile, then the
//! oldest account.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::adapter::UserDirectory;
use crate::error::Result;
use crate::model::{User, UserId};

/// Country code given to local numbers written with a leading `0`.
const LOCAL_COUNTRY_CODE: &str = "+966";

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// Digits and `+` only; `00` becomes `+`; `0XXXXXXXX(X)` gets the local
/// country code.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let phone = if let Some(rest) = kept.strip_prefix("00") {
        format!("+{rest}")
    } else if kept.starts_with('0') && (9..=10).contains(&kept.len()) {
        format!("{LOCAL_COUNTRY_CODE}{}", &kept[1..])
    } else {
        kept
    };
    phone.chars().any(|c| c.is_ascii_digit()).then_some(phone)
}

/// One normalised contact point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl Identifier {
    fn search_term(&self) -> &str {
        match self {
            Identifier::Email(v) | Identifier::Phone(v) => v,
        }
    }
}

/// Normalised identifiers on a user's own profile.
pub fn profile_identifiers(user: &User) -> BTreeSet<Identifier> {
    let mut ids = BTreeSet::new();
    if let Some(email) = user.email.as_deref().and_then(normalize_email) {
        ids.insert(Identifier::Email(email));
    }
    if let Some(phone) = user.phone.as_deref().and_then(normalize_phone) {
        ids.insert(Identifier::Phone(phone));
    }
    ids
}

/// A user competing for survival, with its solved-ticket count.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub user: User,
    pub solved: usize,
}

type Rank = (usize, bool, Option<Reverse<DateTime<Utc>>>, Reverse<UserId>);

fn rank(c: &Candidate) -> Rank {
    (
        c.solved,
        c.user.verified,
        c.user.created_at.map(Reverse),
        Reverse(c.user.id),
    )
}

/// Highest `(solved, verified, earliest created)`; a missing creation time
/// loses, and the lower id breaks any remaining tie.
pub fn pick_survivor(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().max_by_key(|c| rank(c))
}

/// Turn duplicate groups into merge pairs `(source, target)`.
///
/// A user is merged at most once and never serves as both source and
/// target; groups that would violate this are trimmed, not reordered.
pub fn plan_merges(groups: &[Vec<Candidate>]) -> Vec<(UserId, UserId)> {
    let mut sources = HashSet::new();
    let mut targets = HashSet::new();
    let mut pairs = Vec::new();

    for group in groups {
        let Some(survivor) = pick_survivor(group) else {
            continue;
        };
        let target = survivor.user.id;
        if sources.contains(&target) {
            debug!(%target, "survivor already merged away this run");
            continue;
        }
        for member in group {
            let source = member.user.id;
            if source == target || sources.contains(&source) || targets.contains(&source) {
                continue;
            }
            sources.insert(source);
            targets.insert(target);
            pairs.push((source, target));
        }
    }
    pairs
}

/// Finds other end-user profiles sharing a requester's contact points.
pub struct IdentityMatcher<'a, D: ?Sized> {
    directory: &'a D,
}

impl<'a, D> IdentityMatcher<'a, D>
where
    D: UserDirectory + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    /// All identifiers of a user: profile fields plus secondary identities.
    pub async fn identifiers(&self, user: &User) -> Result<BTreeSet<Identifier>> {
        let mut ids = profile_identifiers(user);
        for identity in self.directory.get_user_identities(user.id).await? {
            let id = match identity.kind.as_str() {
                "email" => normalize_email(&identity.value).map(Identifier::Email),
                "phone_number" => normalize_phone(&identity.value).map(Identifier::Phone),
                _ => None,
            };
            ids.extend(id);
        }
        Ok(ids)
    }

    /// The requester and every end user whose profile matches one of its
    /// identifiers exactly, ordered by id.
    pub async fn duplicates_of(&self, requester: &User) -> Result<Vec<User>> {
        let mut found = BTreeMap::new();
        found.insert(requester.id, requester.clone());

        for identifier in self.identifiers(requester).await? {
            for user in self.directory.search_users(identifier.search_term()).await? {
                if !user.is_end_user() || found.contains_key(&user.id) {
                    continue;
                }
                if profile_identifiers(&user).contains(&identifier) {
                    debug!(requester = %requester.id, duplicate = %user.id, ?identifier, "identity match");
                    found.insert(user.id, user);
                }
            }
        }
        Ok(found.into_values().collect())
    }
}

/// Attach solved counts to a duplicate group.
pub fn candidates(users: Vec<User>, solved: &HashMap<UserId, usize>) -> Vec<Candidate> {
    users
        .into_iter()
        .map(|user| Candidate {
            solved: solved.get(&user.id).copied().unwrap_or(0),
            user,
        })
        .collect()
}
