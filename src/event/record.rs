//! The event record: one business-level change, built once and never mutated
//! after it has been queued.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{properties, Message};
use crate::error::{BrokerError, ListenerError};

use super::routing;

/// What happened to the target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Modified,
    Deleted,
    Expired,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Created,
        EventType::Modified,
        EventType::Deleted,
        EventType::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// The kind of business entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Consumer,
    Owner,
    Entitlement,
    Pool,
    Export,
    Import,
    User,
    Role,
    Subscription,
    #[serde(rename = "ACTIVATIONKEY")]
    ActivationKey,
    #[serde(rename = "GUESTID")]
    GuestId,
    Rules,
    Compliance,
    SystemPurposeCompliance,
    Product,
    OwnerContentAccessMode,
}

impl Target {
    pub const ALL: [Target; 16] = [
        Target::Consumer,
        Target::Owner,
        Target::Entitlement,
        Target::Pool,
        Target::Export,
        Target::Import,
        Target::User,
        Target::Role,
        Target::Subscription,
        Target::ActivationKey,
        Target::GuestId,
        Target::Rules,
        Target::Compliance,
        Target::SystemPurposeCompliance,
        Target::Product,
        Target::OwnerContentAccessMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Consumer => "CONSUMER",
            Target::Owner => "OWNER",
            Target::Entitlement => "ENTITLEMENT",
            Target::Pool => "POOL",
            Target::Export => "EXPORT",
            Target::Import => "IMPORT",
            Target::User => "USER",
            Target::Role => "ROLE",
            Target::Subscription => "SUBSCRIPTION",
            Target::ActivationKey => "ACTIVATIONKEY",
            Target::GuestId => "GUESTID",
            Target::Rules => "RULES",
            Target::Compliance => "COMPLIANCE",
            Target::SystemPurposeCompliance => "SYSTEM_PURPOSE_COMPLIANCE",
            Target::Product => "PRODUCT",
            Target::OwnerContentAccessMode => "OWNER_CONTENT_ACCESS_MODE",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown event target: {}", s))
    }
}

/// Secondary cross-reference kind (e.g. the pool an entitlement came from).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Pool,
}

/// Snapshot of the identity that caused the event, taken at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    #[serde(rename = "type")]
    pub principal_type: String,
    pub name: String,
}

impl PrincipalSnapshot {
    pub fn new(principal_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            principal_type: principal_type.into(),
            name: name.into(),
        }
    }

    /// The principal used for work the system does on its own behalf.
    pub fn system() -> Self {
        Self::new("system", "System")
    }
}

impl Default for PrincipalSnapshot {
    fn default() -> Self {
        Self::system()
    }
}

/// One business-level state change.
///
/// `id` stays empty until the record is persisted by an audit store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    pub principal: PrincipalSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<ReferenceType>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_snapshot: Option<String>,
}

impl EventRecord {
    /// Start building an event of the given type about the given target.
    pub fn builder(event_type: EventType, target: Target) -> EventRecordBuilder {
        EventRecordBuilder::new(event_type, target)
    }

    /// Broker destination this event is published to, e.g. `consumer.created`.
    pub fn destination(&self) -> String {
        routing::destination(self.event_type, self.target)
    }

    /// Copy of this record carrying the id assigned on persistence.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Encode as a durable wire message.
    pub fn to_message(&self) -> Result<Message, BrokerError> {
        let payload = serde_json::to_vec(self)?;
        Ok(Message::new(self.destination(), payload)
            .with_property(properties::EVENT_TYPE, self.event_type.as_str())
            .with_property(properties::EVENT_TARGET, self.target.as_str()))
    }

    /// Decode a wire message produced by [`EventRecord::to_message`].
    pub fn from_message(message: &Message) -> Result<Self, ListenerError> {
        Ok(serde_json::from_slice(&message.payload)?)
    }
}

/// Builder for [`EventRecord`].
#[derive(Debug)]
pub struct EventRecordBuilder {
    event_type: EventType,
    target: Target,
    target_name: Option<String>,
    principal: Option<PrincipalSnapshot>,
    owner_id: Option<String>,
    entity_id: Option<String>,
    consumer_id: Option<String>,
    reference: Option<(ReferenceType, String)>,
    old_snapshot: Option<String>,
    new_snapshot: Option<String>,
}

impl EventRecordBuilder {
    pub fn new(event_type: EventType, target: Target) -> Self {
        Self {
            event_type,
            target,
            target_name: None,
            principal: None,
            owner_id: None,
            entity_id: None,
            consumer_id: None,
            reference: None,
            old_snapshot: None,
            new_snapshot: None,
        }
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn principal(mut self, principal: PrincipalSnapshot) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn owner_id(mut self, id: impl Into<String>) -> Self {
        self.owner_id = Some(id.into());
        self
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = Some(id.into());
        self
    }

    pub fn reference(mut self, reference_type: ReferenceType, id: impl Into<String>) -> Self {
        self.reference = Some((reference_type, id.into()));
        self
    }

    /// Serialized form of the entity before the change.
    pub fn old_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.old_snapshot = Some(snapshot.into());
        self
    }

    /// Serialized form of the entity after the change.
    pub fn new_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.new_snapshot = Some(snapshot.into());
        self
    }

    /// Builds the event record, stamping it with the current time.
    ///
    /// # Panics
    ///
    /// Panics if a CREATED event carries an old snapshot, or a DELETED or
    /// EXPIRED event carries a new snapshot.
    pub fn build(self) -> EventRecord {
        assert!(
            !(self.event_type == EventType::Created && self.old_snapshot.is_some()),
            "CREATED event for {} must not carry an old snapshot",
            self.target
        );
        assert!(
            !(matches!(self.event_type, EventType::Deleted | EventType::Expired)
                && self.new_snapshot.is_some()),
            "{} event for {} must not carry a new snapshot",
            self.event_type,
            self.target
        );

        let (reference_type, reference_id) = match self.reference {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };

        EventRecord {
            id: None,
            event_type: self.event_type,
            target: self.target,
            target_name: self.target_name,
            principal: self.principal.unwrap_or_default(),
            owner_id: self.owner_id,
            entity_id: self.entity_id,
            consumer_id: self.consumer_id,
            reference_id,
            reference_type,
            timestamp: Utc::now(),
            old_snapshot: self.old_snapshot,
            new_snapshot: self.new_snapshot,
        }
    }
}
