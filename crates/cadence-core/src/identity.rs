//! Identity resolver.
//!
//! Maps `(provider, external_user_id)` to a platform user, upserting a
//! disabled shadow user on first sight. Resolution is deterministic and
//! idempotent: the same inputs always land on the same user id.

use tracing::{debug, info};

use crate::store::TenantStore;
use crate::types::User;

/// An assignee as seen by a connector.
#[derive(Debug, Clone, Default)]
pub struct ExternalAssignee<'a> {
    /// The vendor's stable user id (ADO descriptor, ClickUp user id, GitHub
    /// login, Jira accountId).
    pub external_user_id: Option<&'a str>,
    pub email: Option<&'a str>,
    pub name: Option<&'a str>,
}

impl<'a> ExternalAssignee<'a> {
    /// The identity key: the vendor's stable id, falling back to email.
    fn identity_key(&self) -> Option<&'a str> {
        self.external_user_id.or(self.email).filter(|s| !s.is_empty())
    }
}

/// Resolve an external assignee to a platform user, creating a shadow user
/// when nothing matches.
///
/// Resolution order:
/// 1. `ExternalIdentity(provider, external_user_id)`;
/// 2. user email, case-insensitive;
/// 3. when no email, first/last name split on the first space;
/// 4. create a new inactive user with an unusable password.
///
/// Post-resolution the identity mapping is upserted and empty names are
/// filled in from the vendor record.
pub async fn resolve_user(
    store: &TenantStore,
    provider: &str,
    assignee: ExternalAssignee<'_>,
) -> crate::Result<Option<User>> {
    let key = match assignee.identity_key() {
        Some(k) => k,
        None => return Ok(None),
    };

    let (first_name, last_name) = split_name(assignee.name.unwrap_or(""));

    let user = match lookup(store, provider, key, &assignee, &first_name, &last_name).await? {
        Some(user) => user,
        None => {
            let user = create_shadow_user(store, provider, &assignee).await?;
            info!(
                provider,
                external_id = key,
                username = %user.username,
                "created shadow user for unseen assignee"
            );
            user
        }
    };

    store.upsert_identity(provider, key, user.id).await?;

    if user.first_name.is_empty() && user.last_name.is_empty() && !first_name.is_empty() {
        store
            .update_user_names(user.id, &first_name, &last_name)
            .await?;
    }

    Ok(store.get_user(user.id).await?.or(Some(user)))
}

/// Lookup-only variant: resolves through the same chain but never creates a
/// user. Used for PR authors, where a shadow user is not warranted.
pub async fn resolve_existing(
    store: &TenantStore,
    provider: &str,
    assignee: ExternalAssignee<'_>,
) -> crate::Result<Option<User>> {
    let key = match assignee.identity_key() {
        Some(k) => k,
        None => return Ok(None),
    };
    let (first_name, last_name) = split_name(assignee.name.unwrap_or(""));
    lookup(store, provider, key, &assignee, &first_name, &last_name).await
}

async fn lookup(
    store: &TenantStore,
    provider: &str,
    key: &str,
    assignee: &ExternalAssignee<'_>,
    first_name: &str,
    last_name: &str,
) -> crate::Result<Option<User>> {
    if let Some(identity) = store.get_identity(provider, key).await? {
        debug!(provider, external_id = key, "resolved via identity mapping");
        return store.get_user(identity.user_id).await;
    }

    if let Some(email) = assignee.email.filter(|e| !e.is_empty()) {
        if let Some(user) = store.find_user_by_email(email).await? {
            return Ok(Some(user));
        }
    } else if !first_name.is_empty() {
        if let Some(user) = store.find_user_by_name(first_name, last_name).await? {
            return Ok(Some(user));
        }
    }

    Ok(None)
}

async fn create_shadow_user(
    store: &TenantStore,
    provider: &str,
    assignee: &ExternalAssignee<'_>,
) -> crate::Result<User> {
    let base_username = match assignee.email.filter(|e| !e.is_empty()) {
        Some(email) => email.to_lowercase(),
        None => {
            let name = assignee.name.unwrap_or("unknown");
            format!("{}@{}.sync", name.replace(' ', ".").to_lowercase(), provider)
        }
    };

    // Dedupe by appending .2, .3, ... until the username is free.
    let mut username = base_username.clone();
    let mut n = 1u32;
    while store.find_user_by_username(&username).await?.is_some() {
        n += 1;
        username = format!("{base_username}.{n}");
    }

    let mut user = User::shadow(username, assignee.email.map(|e| e.to_string()));
    let (first, last) = split_name(assignee.name.unwrap_or(""));
    user.first_name = first;
    user.last_name = last;

    store.insert_user(&user).await?;
    Ok(user)
}

/// Split a display name into (first, last) on the first space.
fn split_name(name: &str) -> (String, String) {
    let trimmed = name.trim();
    match trimmed.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TenantStore;

    #[test]
    fn split_name_on_first_space() {
        assert_eq!(split_name("Arun Singh"), ("Arun".into(), "Singh".into()));
        assert_eq!(
            split_name("Ana Maria Costa"),
            ("Ana".into(), "Maria Costa".into())
        );
        assert_eq!(split_name("Cher"), ("Cher".into(), String::new()));
        assert_eq!(split_name(""), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn first_sight_creates_inactive_shadow_user() {
        let store = TenantStore::open_in_memory().await.unwrap();

        let user = resolve_user(
            &store,
            "clickup",
            ExternalAssignee {
                external_user_id: Some("u42"),
                email: None,
                name: Some("Arun Singh"),
            },
        )
        .await
        .unwrap()
        .expect("user created");

        assert_eq!(user.username, "arun.singh@clickup.sync");
        assert_eq!(user.first_name, "Arun");
        assert_eq!(user.last_name, "Singh");
        assert!(!user.is_active);
        assert!(!user.has_usable_password);

        let identity = store.get_identity("clickup", "u42").await.unwrap().unwrap();
        assert_eq!(identity.user_id, user.id);
    }

    #[tokio::test]
    async fn resolving_twice_returns_same_user() {
        let store = TenantStore::open_in_memory().await.unwrap();
        let assignee = || ExternalAssignee {
            external_user_id: Some("u42"),
            email: None,
            name: Some("Arun Singh"),
        };

        let first = resolve_user(&store, "clickup", assignee())
            .await
            .unwrap()
            .unwrap();
        let second = resolve_user(&store, "clickup", assignee())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn email_match_links_identity_to_existing_user() {
        let store = TenantStore::open_in_memory().await.unwrap();
        let mut existing = User::shadow("dev1", Some("Dev@Example.com".into()));
        existing.is_active = true;
        store.insert_user(&existing).await.unwrap();

        let resolved = resolve_user(
            &store,
            "jira",
            ExternalAssignee {
                external_user_id: Some("acct-1"),
                email: Some("dev@example.com"),
                name: Some("Dev One"),
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(resolved.id, existing.id);
        // Identity now makes the next resolution O(1) even without the email.
        let again = resolve_user(
            &store,
            "jira",
            ExternalAssignee {
                external_user_id: Some("acct-1"),
                email: None,
                name: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(again.id, existing.id);
    }

    #[tokio::test]
    async fn name_match_used_only_without_email() {
        let store = TenantStore::open_in_memory().await.unwrap();
        let mut existing = User::shadow("jdoe", None);
        existing.first_name = "Jane".into();
        existing.last_name = "Doe".into();
        store.insert_user(&existing).await.unwrap();

        let resolved = resolve_user(
            &store,
            "azure_devops",
            ExternalAssignee {
                external_user_id: Some("desc-1"),
                email: None,
                name: Some("Jane Doe"),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resolved.id, existing.id);
    }

    #[tokio::test]
    async fn username_collision_appends_counter() {
        let store = TenantStore::open_in_memory().await.unwrap();
        store
            .insert_user(&User::shadow("arun.singh@clickup.sync", None))
            .await
            .unwrap();

        let user = resolve_user(
            &store,
            "clickup",
            ExternalAssignee {
                external_user_id: Some("u43"),
                email: None,
                name: Some("Arun Singh"),
            },
        )
        .await
        .unwrap()
        .unwrap();

        // The pre-existing row has no name so the name lookup misses; a new
        // user is minted with a deduped username.
        assert_eq!(user.username, "arun.singh@clickup.sync.2");
    }

    #[tokio::test]
    async fn resolve_existing_never_creates() {
        let store = TenantStore::open_in_memory().await.unwrap();
        let resolved = resolve_existing(
            &store,
            "github",
            ExternalAssignee {
                external_user_id: Some("octocat"),
                email: None,
                name: None,
            },
        )
        .await
        .unwrap();
        assert!(resolved.is_none());
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_assignee_resolves_to_none() {
        let store = TenantStore::open_in_memory().await.unwrap();
        let resolved = resolve_user(&store, "jira", ExternalAssignee::default())
            .await
            .unwrap();
        assert!(resolved.is_none());
    }
}
