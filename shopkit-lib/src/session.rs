//! Session/profile bridge.
//!
//! On join the user's profile is leased, reconciled against the registered
//! currency defaults and cached as the user's session; on leave the final
//! document is written back and the lease released. A lease revoked by the
//! store (the profile was loaded elsewhere) ends the session at once, without
//! saving, so two servers never write the same document.

use crate::events::ProfileLoaded;
use crate::profile::{LeaseToken, ProfileDocument, ProfileLease};
use crate::storefront::Context;
use crate::{Result, ShopkitError, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The application's session lifecycle, as seen by Shopkit.
pub trait SessionHost: Send + Sync {
    /// Forcibly end the user's session with a user-visible reason.
    fn kick(&self, user: UserId, reason: &str);

    /// Whether the user is still connected.
    fn is_present(&self, _user: UserId) -> bool {
        true
    }
}

/// A loaded profile and the lease that protects it.
pub struct Session {
    pub(crate) token: LeaseToken,
    pub(crate) document: ProfileDocument,
    pub(crate) session_id: Uuid,
    /// Set once the session left the map. A closed document is no longer
    /// written back, so nothing may change it.
    pub(crate) closed: bool,
    watcher: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(token: LeaseToken, document: ProfileDocument) -> Self {
        Self {
            token,
            document,
            session_id: Uuid::new_v4(),
            closed: false,
            watcher: None,
        }
    }

    /// A session with no backing lease.
    #[cfg(test)]
    pub(crate) fn detached(document: ProfileDocument) -> Self {
        Self::new(
            LeaseToken {
                key: "detached".to_string(),
                lease_id: Uuid::nil(),
            },
            document,
        )
    }
}

pub(crate) type SharedSession = Arc<Mutex<Session>>;

pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// Active sessions by user.
#[derive(Default)]
pub struct Sessions {
    sessions: RwLock<HashMap<UserId, SharedSession>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, user: UserId) -> Option<SharedSession> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(&user).cloned()
    }

    pub(crate) fn insert(&self, user: UserId, session: Session) -> SharedSession {
        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(user, shared.clone());
        shared
    }

    pub(crate) fn remove(&self, user: UserId) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&user)
    }

    /// Remove the user's session only if it is still the given one.
    pub(crate) fn remove_if_current(
        &self,
        user: UserId,
        session_id: Uuid,
    ) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let current = sessions
            .get(&user)
            .is_some_and(|s| lock_session(s).session_id == session_id);
        if current {
            sessions.remove(&user)
        } else {
            None
        }
    }

    pub fn contains(&self, user: UserId) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load the user's profile and open a session.
pub(crate) async fn join(ctx: &Arc<Context>, user: UserId) -> Result<()> {
    if ctx.sessions.contains(user) {
        tracing::warn!(%user, "user already has a session");
        return Ok(());
    }
    ctx.users.get_or_create(user);

    let key = user.profile_key(&ctx.config.profile_key_prefix);
    let lease = match ctx.profiles.load_exclusive(&key).await {
        Ok(lease) => lease,
        Err(e) => {
            tracing::error!(%user, key, error = %e, "profile failed to load");
            ctx.discard_user(user);
            ctx.host.kick(user, &ctx.config.profile_load_failure_message);
            return Err(match e {
                ShopkitError::ProfileLoadFailure { .. } => e,
                other => ShopkitError::ProfileLoadFailure {
                    key,
                    reason: other.to_string(),
                },
            });
        }
    };

    let ProfileLease {
        key,
        lease_id,
        mut document,
        revoked,
    } = lease;
    let token = LeaseToken { key, lease_id };

    if !ctx.host.is_present(user) {
        // Left while the profile was loading.
        tracing::info!(%user, "user left during profile load, releasing");
        ctx.discard_user(user);
        ctx.profiles.release(token, &document).await?;
        return Err(ShopkitError::NoSession(user));
    }

    let template = ProfileDocument {
        currencies: ctx.currencies.defaults(),
        ..ProfileDocument::default()
    };
    let filled = document.reconcile(&template);

    let session = Session::new(token, document);
    let session_id = session.session_id;
    let shared = ctx.sessions.insert(user, session);

    let weak = Arc::downgrade(ctx);
    let mut revoked = revoked;
    let watcher = tokio::spawn(async move {
        // Err means the store dropped the lease sender: released normally.
        if revoked.wait_for(|r| *r).await.is_ok() {
            if let Some(ctx) = weak.upgrade() {
                force_end(&ctx, user, session_id);
            }
        }
    });
    lock_session(&shared).watcher = Some(watcher);

    tracing::info!(%user, filled, "profile loaded");
    ctx.events.profile_loaded.fire(&ProfileLoaded { user });
    Ok(())
}

/// Close the user's session, persist the document and release the lease.
pub(crate) async fn leave(ctx: &Context, user: UserId) -> Result<()> {
    ctx.discard_user(user);
    let Some(session) = ctx.sessions.remove(user) else {
        return Ok(());
    };

    let (token, document, watcher) = {
        let mut session = lock_session(&session);
        session.closed = true;
        session.document.touch();
        (
            session.token.clone(),
            session.document.clone(),
            session.watcher.take(),
        )
    };
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    ctx.profiles.release(token, &document).await.map_err(|e| {
        tracing::error!(%user, error = %e, "failed to release profile");
        e
    })?;
    tracing::info!(%user, "profile released");
    Ok(())
}

/// Persist the user's current document under the held lease.
pub(crate) async fn save(ctx: &Context, user: UserId) -> Result<()> {
    let session = ctx.sessions.get(user).ok_or(ShopkitError::NoSession(user))?;
    let (token, document) = {
        let mut session = lock_session(&session);
        session.document.touch();
        (session.token.clone(), session.document.clone())
    };
    ctx.profiles.save(&token, &document).await
}

/// End a session whose lease was revoked. Nothing is written back.
fn force_end(ctx: &Context, user: UserId, session_id: Uuid) {
    let Some(session) = ctx.sessions.remove_if_current(user, session_id) else {
        return;
    };
    lock_session(&session).closed = true;
    ctx.discard_user(user);
    tracing::warn!(%user, "profile lease revoked, ending session");
    ctx.host.kick(user, &ctx.config.profile_revoked_message);
}
