use crate::error::EngineError;

/// An actor making a request, as established by whatever sits in front of
/// the engine (§1: auth token parsing is an external collaborator).
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: String,
}

/// Pure predicate over `(actor, clientId)`. The engine consumes this as a
/// boundary trait and never implements RBAC policy itself (§9: "Ad-hoc role
/// checks scattered across handlers" consolidates here).
pub trait AuthorizationOracle: Send + Sync {
    fn can_write(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError>;
    fn can_read(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError>;
    fn can_manage_channel(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError>;
}

/// Reference oracle: client-admins and platform-admins may act on their own
/// client; anyone else is forbidden. Good enough to wire the HTTP edge
/// end-to-end without pulling in a real policy engine.
pub struct RoleBasedOracle;

impl RoleBasedOracle {
    fn owns_client(actor: &Actor, client_id: &str) -> bool {
        actor.role == "platform-admin" || actor.id == client_id || actor.role == format!("admin:{client_id}")
    }
}

impl AuthorizationOracle for RoleBasedOracle {
    fn can_write(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError> {
        if Self::owns_client(actor, client_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!("{} cannot write to {client_id}", actor.id)))
        }
    }

    fn can_read(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError> {
        self.can_write(actor, client_id)
    }

    fn can_manage_channel(&self, actor: &Actor, client_id: &str) -> Result<(), EngineError> {
        self.can_write(actor, client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_admin_may_act_on_any_client() {
        let oracle = RoleBasedOracle;
        let actor = Actor { id: "u1".into(), role: "platform-admin".into() };
        assert!(oracle.can_write(&actor, "C1").is_ok());
    }

    #[test]
    fn unrelated_actor_is_forbidden() {
        let oracle = RoleBasedOracle;
        let actor = Actor { id: "u1".into(), role: "viewer".into() };
        assert!(oracle.can_write(&actor, "C1").is_err());
    }
}
