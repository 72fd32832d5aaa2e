//! Event fan-out to one user, a room, or a whole organization.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::events::ServerEvent;
use parley_core::ids::{ChatId, OrgId, UserId};
use parley_store::users::UserRepo;
use parley_store::StoreError;

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomIndex;

/// Resolves an organization to its user ids for org-wide fan-out. The
/// lookup lives with the storage collaborator; this seam keeps the router
/// testable without a database.
pub trait OrgDirectory: Send + Sync {
    fn org_user_ids(&self, org_id: &OrgId) -> Result<Vec<UserId>, StoreError>;
}

impl OrgDirectory for UserRepo {
    fn org_user_ids(&self, org_id: &OrgId) -> Result<Vec<UserId>, StoreError> {
        UserRepo::org_user_ids(self, org_id)
    }
}

/// Pure fan-out over the registry; no persistence side effects. Per-recipient
/// send failures are isolated — the registry reaps the failing connection and
/// delivery continues with the rest.
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomIndex>,
    directory: Arc<dyn OrgDirectory>,
}

impl BroadcastRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomIndex>,
        directory: Arc<dyn OrgDirectory>,
    ) -> Self {
        Self { registry, rooms, directory }
    }

    /// Deliver to a single user. Returns whether the event was queued.
    pub fn to_user(&self, user_id: &UserId, event: &ServerEvent) -> bool {
        self.registry.send(user_id, event)
    }

    /// Deliver to every live member of a room, optionally excluding one
    /// user (typically the originator). Returns the delivered count.
    pub fn to_room(
        &self,
        chat_id: &ChatId,
        event: &ServerEvent,
        exclude: Option<&UserId>,
    ) -> usize {
        let Some(json) = serialize(event) else { return 0 };
        let members = self.rooms.members(chat_id);
        let delivered = self.fan_out(members.iter(), &json, exclude);
        debug!(event_type = event.event_type(), chat_id = %chat_id, delivered,
            "room broadcast");
        delivered
    }

    /// Deliver to every online member of an organization. Membership comes
    /// from the directory, not the room index — used for ticket lifecycle
    /// events where room subscriptions do not apply.
    pub fn to_org(
        &self,
        org_id: &OrgId,
        event: &ServerEvent,
        exclude: Option<&UserId>,
    ) -> Result<usize, StoreError> {
        let Some(json) = serialize(event) else { return Ok(0) };
        let members = self.directory.org_user_ids(org_id)?;
        let delivered = self.fan_out(members.iter(), &json, exclude);
        debug!(event_type = event.event_type(), org_id = %org_id, delivered,
            "org broadcast");
        Ok(delivered)
    }

    fn fan_out<'a>(
        &self,
        recipients: impl Iterator<Item = &'a UserId>,
        json: &str,
        exclude: Option<&UserId>,
    ) -> usize {
        let mut delivered = 0;
        for user_id in recipients {
            if Some(user_id) == exclude {
                continue;
            }
            if self.registry.send_text(user_id, json) {
                delivered += 1;
            }
        }
        delivered
    }
}

fn serialize(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct StaticDirectory(Vec<UserId>);

    impl OrgDirectory for StaticDirectory {
        fn org_user_ids(&self, _org_id: &OrgId) -> Result<Vec<UserId>, StoreError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDirectory;

    impl OrgDirectory for FailingDirectory {
        fn org_user_ids(&self, org_id: &OrgId) -> Result<Vec<UserId>, StoreError> {
            Err(StoreError::NotFound(format!("org {org_id}")))
        }
    }

    fn setup(directory: Arc<dyn OrgDirectory>) -> (BroadcastRouter, Arc<ConnectionRegistry>, Arc<RoomIndex>) {
        let rooms = Arc::new(RoomIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&rooms), 32));
        let router = BroadcastRouter::new(Arc::clone(&registry), Arc::clone(&rooms), directory);
        (router, registry, rooms)
    }

    fn join(registry: &ConnectionRegistry, rooms: &RoomIndex, user: &str, chat: &ChatId)
        -> mpsc::Receiver<String>
    {
        let user = UserId::from_raw(user);
        let (_conn, rx) = registry.register(user.clone());
        rooms.join(user, chat.clone());
        rx
    }

    fn typing_event(chat: &ChatId, user: &str) -> ServerEvent {
        ServerEvent::Typing {
            chat_id: chat.clone(),
            user_id: UserId::from_raw(user),
            is_typing: true,
        }
    }

    #[test]
    fn to_user_delegates_to_registry() {
        let (router, registry, _) = setup(Arc::new(StaticDirectory(vec![])));
        let user = UserId::from_raw("user_a");
        let (_conn, mut rx) = registry.register(user.clone());

        assert!(router.to_user(&user, &ServerEvent::Ping { ts: chrono::Utc::now() }));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn to_room_excludes_originator() {
        let (router, registry, rooms) = setup(Arc::new(StaticDirectory(vec![])));
        let chat = ChatId::from_raw("c1");
        let mut rx_a = join(&registry, &rooms, "user_a", &chat);
        let mut rx_b = join(&registry, &rooms, "user_b", &chat);

        let sender = UserId::from_raw("user_a");
        let delivered = router.to_room(&chat, &typing_event(&chat, "user_a"), Some(&sender));

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn to_room_unknown_room_delivers_nothing() {
        let (router, _, _) = setup(Arc::new(StaticDirectory(vec![])));
        let chat = ChatId::from_raw("nowhere");
        assert_eq!(router.to_room(&chat, &typing_event(&chat, "user_a"), None), 0);
    }

    #[test]
    fn one_dead_recipient_does_not_abort_the_rest() {
        let (router, registry, rooms) = setup(Arc::new(StaticDirectory(vec![])));
        let chat = ChatId::from_raw("c1");
        let rx_a = join(&registry, &rooms, "user_a", &chat);
        let mut rx_b = join(&registry, &rooms, "user_b", &chat);
        let mut rx_c = join(&registry, &rooms, "user_c", &chat);

        // user_a's socket is dead; the broadcast must still reach b and c
        // and the failure must reap a's membership.
        drop(rx_a);
        let delivered = router.to_room(&chat, &typing_event(&chat, "user_z"), None);

        assert_eq!(delivered, 2);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(!rooms.members(&chat).contains(&UserId::from_raw("user_a")));
    }

    #[test]
    fn to_org_reaches_online_members_only() {
        let members = vec![
            UserId::from_raw("user_a"),
            UserId::from_raw("user_b"),
            UserId::from_raw("user_offline"),
        ];
        let (router, registry, _) = setup(Arc::new(StaticDirectory(members)));
        let (_ca, mut rx_a) = registry.register(UserId::from_raw("user_a"));
        let (_cb, mut rx_b) = registry.register(UserId::from_raw("user_b"));

        let org = OrgId::from_raw("org_1");
        let event = ServerEvent::Ping { ts: chrono::Utc::now() };
        let delivered = router.to_org(&org, &event, None).unwrap();

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn to_org_excludes_originator() {
        let members = vec![UserId::from_raw("user_a"), UserId::from_raw("user_b")];
        let (router, registry, _) = setup(Arc::new(StaticDirectory(members)));
        let (_ca, mut rx_a) = registry.register(UserId::from_raw("user_a"));
        let (_cb, mut rx_b) = registry.register(UserId::from_raw("user_b"));

        let creator = UserId::from_raw("user_a");
        let delivered = router
            .to_org(&OrgId::from_raw("org_1"), &ServerEvent::Ping { ts: chrono::Utc::now() }, Some(&creator))
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn to_org_surfaces_directory_errors() {
        let (router, _, _) = setup(Arc::new(FailingDirectory));
        let result = router.to_org(
            &OrgId::from_raw("org_1"),
            &ServerEvent::Ping { ts: chrono::Utc::now() },
            None,
        );
        assert!(result.is_err());
    }
}
