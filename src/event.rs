//! Event envelope types and data structures.
//!
//! This module defines the canonical telemetry event that flows through the
//! entire pipeline: created on the client (manual API or instrumentation
//! hooks), batched by the collector, transported to the ingestion buffer, and
//! finally persisted in the event store. Events are append-only: once created
//! they are never mutated, only moved between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of telemetry events recognized by the pipeline.
///
/// The set covers passive instrumentation (page views, clicks, errors,
/// API requests) as well as host-defined custom events. Serialized as
/// snake_case strings on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    PageLeave,
    Click,
    LinkClick,
    FormSubmit,
    InputFocus,
    InputBlur,
    ApiRequest,
    Error,
    Scroll,
    Resize,
    Custom,
}

impl EventKind {
    /// Returns the wire name of the kind for logging and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::PageLeave => "page_leave",
            EventKind::Click => "click",
            EventKind::LinkClick => "link_click",
            EventKind::FormSubmit => "form_submit",
            EventKind::InputFocus => "input_focus",
            EventKind::InputBlur => "input_blur",
            EventKind::ApiRequest => "api_request",
            EventKind::Error => "error",
            EventKind::Scroll => "scroll",
            EventKind::Resize => "resize",
            EventKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page context attached to navigation and interaction events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageContext {
    /// Page path (route), e.g. `/dashboard`
    pub path: String,

    /// Page title at the time of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Time spent on the page in milliseconds (page-leave events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Referrer that led to this page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// Interaction context for click and form events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InteractionContext {
    /// Element identifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,

    /// Element kind (button, link, input, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_kind: Option<String>,

    /// Visible text of the element, truncated by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
}

/// Network context for instrumented outgoing requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkContext {
    /// Request URL
    pub url: String,

    /// HTTP method
    pub method: String,

    /// Observed response time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// HTTP status code, absent when the request never completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Error context for captured errors and rejections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    /// Error message
    pub message: String,

    /// Stack trace, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Where the error was captured (error hook, rejection hook, resource url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The canonical telemetry event envelope.
///
/// Every event carries a globally unique id generated at creation time and a
/// session id that is stable for the lifetime of one client session. Events
/// are serialized as JSON end to end; optional context blocks are omitted
/// from the wire form when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEvent {
    /// Globally unique event id (UUID v4, generated at creation)
    pub id: String,

    /// Event kind
    pub kind: EventKind,

    /// Actor identifier (user id or anonymous id)
    pub actor_id: String,

    /// Actor display name
    #[serde(default)]
    pub actor_name: String,

    /// Session the event belongs to
    pub session_id: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Page context (navigation and interaction events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageContext>,

    /// Interaction context (click and form events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<InteractionContext>,

    /// Network context (api-request events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkContext>,

    /// Error context (error events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorContext>,

    /// Device context snapshot captured by the collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<crate::device::DeviceSnapshot>,

    /// Free-form custom payload
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub custom: serde_json::Value,

    /// Tag set for downstream filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl UserEvent {
    /// Creates a new event with a fresh unique id and the current timestamp.
    pub fn new(
        kind: EventKind,
        actor_id: impl Into<String>,
        actor_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            page: None,
            interaction: None,
            network: None,
            error: None,
            device: None,
            custom: serde_json::Value::Null,
            tags: Vec::new(),
        }
    }

    /// Attaches page context.
    pub fn with_page(mut self, page: PageContext) -> Self {
        self.page = Some(page);
        self
    }

    /// Attaches interaction context.
    pub fn with_interaction(mut self, interaction: InteractionContext) -> Self {
        self.interaction = Some(interaction);
        self
    }

    /// Attaches network context.
    pub fn with_network(mut self, network: NetworkContext) -> Self {
        self.network = Some(network);
        self
    }

    /// Attaches error context.
    pub fn with_error(mut self, error: ErrorContext) -> Self {
        self.error = Some(error);
        self
    }

    /// Attaches a device snapshot.
    pub fn with_device(mut self, device: crate::device::DeviceSnapshot) -> Self {
        self.device = Some(device);
        self
    }

    /// Attaches a custom payload.
    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = custom;
        self
    }

    /// Attaches tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Returns the page path if the event carries page context.
    pub fn page_path(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.path.as_str())
    }
}

/// A pending event inside the client queue.
///
/// Wraps the event with delivery bookkeeping. Queue items exist only between
/// submission and successful delivery (or retry exhaustion); they are what
/// the collector persists in its durable snapshot so an interrupted session
/// can recover un-flushed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    /// The wrapped event
    pub event: UserEvent,

    /// Number of failed delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,

    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Wraps a freshly submitted event.
    pub fn new(event: UserEvent) -> Self {
        Self {
            event,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }
}
