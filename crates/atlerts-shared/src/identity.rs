//! Conversation identity derivation.
//!
//! Both participants of a direct conversation subscribe to the same message
//! stream without negotiating anything, so the id must be a pure function of
//! the unordered pair of identities.

use crate::constants::CONVERSATION_SEPARATOR;
use crate::error::IdentityError;
use crate::types::{ConversationId, UserIdentity};

/// Check that an identity can take part in a conversation id.
///
/// A separator inside an identity would make `a_b + c` and `a + b_c`
/// resolve to the same id. Conversation ids also name store collections,
/// so `/` is refused too.
pub fn validate_identity(user: &UserIdentity) -> Result<(), IdentityError> {
    if user.is_empty() {
        return Err(IdentityError::Empty);
    }
    if user.as_str().contains(CONVERSATION_SEPARATOR) {
        return Err(IdentityError::ContainsSeparator(user.to_string()));
    }
    if user.as_str().contains('/') {
        return Err(IdentityError::ContainsPathSeparator(user.to_string()));
    }
    Ok(())
}

/// Derive the conversation id for `local` talking to `peer`.
///
/// With a peer the two identities are sorted and joined, so
/// `resolve(a, b) == resolve(b, a)`. Without one (helpdesk) the local
/// identity is the conversation id.
pub fn resolve_conversation_id(
    local: &UserIdentity,
    peer: Option<&UserIdentity>,
) -> Result<ConversationId, IdentityError> {
    validate_identity(local)?;

    let Some(peer) = peer else {
        return Ok(ConversationId::from_raw(local.as_str()));
    };

    validate_identity(peer)?;
    if peer == local {
        return Err(IdentityError::SelfConversation(local.to_string()));
    }

    let (first, second) = if local <= peer { (local, peer) } else { (peer, local) };
    Ok(ConversationId::from_raw(format!(
        "{first}{CONVERSATION_SEPARATOR}{second}"
    )))
}

/// The other participant of `conversation`, as seen from `local`.
///
/// Returns `Ok(None)` for a one-party (helpdesk) conversation owned by
/// `local`.
pub fn counterpart(
    conversation: &ConversationId,
    local: &UserIdentity,
) -> Result<Option<UserIdentity>, IdentityError> {
    let not_a_participant = || IdentityError::NotAParticipant {
        conversation: conversation.to_string(),
        user: local.to_string(),
    };

    match conversation.as_str().split_once(CONVERSATION_SEPARATOR) {
        None if conversation.as_str() == local.as_str() => Ok(None),
        None => Err(not_a_participant()),
        Some((a, b)) if a == local.as_str() => Ok(Some(UserIdentity::from(b))),
        Some((a, b)) if b == local.as_str() => Ok(Some(UserIdentity::from(a))),
        Some(_) => Err(not_a_participant()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> UserIdentity {
        UserIdentity::from(s)
    }

    #[test]
    fn test_resolve_is_commutative() {
        let alice = user("alice");
        let bob = user("bob");
        let ab = resolve_conversation_id(&alice, Some(&bob)).unwrap();
        let ba = resolve_conversation_id(&bob, Some(&alice)).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.as_str(), "alice_bob");
    }

    #[test]
    fn test_resolve_distinct_pairs_do_not_collide() {
        let ids = ["alice", "bob", "carol", "dave", "Zed", "a1", "a"];
        let mut seen = std::collections::HashMap::new();
        for (i, x) in ids.iter().enumerate() {
            for y in ids.iter().skip(i + 1) {
                let id = resolve_conversation_id(&user(x), Some(&user(y))).unwrap();
                let pair = if x < y { (*x, *y) } else { (*y, *x) };
                if let Some(previous) = seen.insert(id.clone(), pair) {
                    panic!("{id} produced by {previous:?} and {pair:?}");
                }
            }
        }
        // Helpdesk ids never contain the separator, so they cannot clash
        // with a pair either.
        for x in ids {
            let support = resolve_conversation_id(&user(x), None).unwrap();
            assert!(!seen.contains_key(&support));
        }
    }

    #[test]
    fn test_default_support_agent_is_a_valid_identity() {
        let agent = user(crate::constants::DEFAULT_SUPPORT_AGENT_ID);
        assert_eq!(validate_identity(&agent), Ok(()));
        assert!(resolve_conversation_id(&user("alice"), Some(&agent)).is_ok());
    }

    #[test]
    fn test_support_conversation_uses_local_identity() {
        let id = resolve_conversation_id(&user("alice"), None).unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_resolve_rejects_malformed_identities() {
        assert_eq!(
            resolve_conversation_id(&user(""), Some(&user("bob"))),
            Err(IdentityError::Empty)
        );
        assert_eq!(
            resolve_conversation_id(&user("alice"), Some(&user(""))),
            Err(IdentityError::Empty)
        );
        assert!(matches!(
            resolve_conversation_id(&user("a_b"), Some(&user("c"))),
            Err(IdentityError::ContainsSeparator(_))
        ));
        assert!(matches!(
            resolve_conversation_id(&user("a/b"), Some(&user("c"))),
            Err(IdentityError::ContainsPathSeparator(_))
        ));
        assert!(matches!(
            resolve_conversation_id(&user("alice"), Some(&user("messages/x"))),
            Err(IdentityError::ContainsPathSeparator(_))
        ));
        assert!(matches!(
            resolve_conversation_id(&user("x/y"), None),
            Err(IdentityError::ContainsPathSeparator(_))
        ));
        assert!(matches!(
            resolve_conversation_id(&user("alice"), Some(&user("alice"))),
            Err(IdentityError::SelfConversation(_))
        ));
    }

    #[test]
    fn test_counterpart() {
        let alice = user("alice");
        let bob = user("bob");
        let id = resolve_conversation_id(&alice, Some(&bob)).unwrap();
        assert_eq!(counterpart(&id, &alice).unwrap(), Some(bob.clone()));
        assert_eq!(counterpart(&id, &bob).unwrap(), Some(alice.clone()));
        assert!(counterpart(&id, &user("carol")).is_err());

        let support = resolve_conversation_id(&alice, None).unwrap();
        assert_eq!(counterpart(&support, &alice).unwrap(), None);
        assert!(counterpart(&support, &bob).is_err());
    }
}
