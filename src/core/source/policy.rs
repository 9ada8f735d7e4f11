use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Target;

/// Discriminates the policy variants. The wire `code` is kept compatible
/// with existing API consumers: reserve and avoid share code 2, so the
/// `kind` string is the reliable discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCode {
    Block,
    Reserve,
    Avoid,
    Sticky,
    /// Caller-defined accept function; carried by [`GenPolicy`] only.
    Generic,
}

impl PolicyCode {
    pub fn wire(self) -> u8 {
        match self {
            PolicyCode::Block => 1,
            PolicyCode::Reserve | PolicyCode::Avoid => 2,
            PolicyCode::Sticky => 3,
            PolicyCode::Generic => 0,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            PolicyCode::Block => "block",
            PolicyCode::Reserve => "reserve",
            PolicyCode::Avoid => "avoid",
            PolicyCode::Sticky => "sticky",
            PolicyCode::Generic => "generic",
        }
    }
}

/// An admission rule over `(source, target)` pairs.
///
/// `accept` returns whether `source` may serve `target`. Storage
/// membership checks pass [`Target::Any`]; target-specific variants must
/// accept the wildcard so a source is only evicted when no target at all
/// could be served by it.
pub trait Policy: Send + Sync {
    /// Unique identifier of this policy instance, used for later removal.
    fn id(&self) -> &str;

    fn code(&self) -> PolicyCode;

    /// Who issued this policy (e.g. "api", "cli").
    fn issuer(&self) -> &str;

    /// Why this policy exists.
    fn reason(&self) -> Option<&str> {
        None
    }

    /// How the policy acts.
    fn description(&self) -> String;

    fn accept(&self, source: &str, target: Target<'_>) -> bool;

    /// Inert serde record of this policy for API inspection.
    fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            id: self.id().to_string(),
            code: self.code().wire(),
            kind: self.code().kind().to_string(),
            issuer: self.issuer().to_string(),
            reason: self.reason().map(|r| r.to_string()),
            description: self.description(),
        }
    }
}

impl fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("id", &self.id())
            .field("kind", &self.code().kind())
            .finish()
    }
}

/// Wire representation of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub id: String,
    pub code: u8,
    pub kind: String,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub description: String,
}

/// Rejects every `(source_id, *)` pair: the source is never used.
pub struct BlockPolicy {
    id: String,
    source_id: String,
    issuer: String,
    reason: Option<String>,
}

impl BlockPolicy {
    pub fn new(issuer: impl Into<String>, source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            id: format!("block_{source_id}"),
            source_id,
            issuer: issuer.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Policy for BlockPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn code(&self) -> PolicyCode {
        PolicyCode::Block
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn description(&self) -> String {
        format!("source {} will no longer be used", self.source_id)
    }

    fn accept(&self, source: &str, _target: Target<'_>) -> bool {
        source != self.source_id
    }
}

/// Reserves `source_id` for `target`: the source accepts only that target,
/// while other sources are unaffected (they may still serve it).
pub struct ReservedPolicy {
    id: String,
    source_id: String,
    target: String,
    issuer: String,
    reason: Option<String>,
}

impl ReservedPolicy {
    pub fn new(
        issuer: impl Into<String>,
        source_id: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let source_id = source_id.into();
        let target = target.into();
        Self {
            id: format!("reserve_{source_id}_for_{target}"),
            source_id,
            target,
            issuer: issuer.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Policy for ReservedPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn code(&self) -> PolicyCode {
        PolicyCode::Reserve
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn description(&self) -> String {
        format!(
            "source {} will only be used for connections to {}",
            self.source_id, self.target
        )
    }

    fn accept(&self, source: &str, target: Target<'_>) -> bool {
        if source != self.source_id {
            return true;
        }
        match target {
            Target::Any => true,
            Target::Addr(addr) => addr == self.target,
        }
    }
}

/// Keeps `source_id` away from `target`; every other pair is accepted.
pub struct AvoidPolicy {
    id: String,
    source_id: String,
    target: String,
    issuer: String,
    reason: Option<String>,
}

impl AvoidPolicy {
    pub fn new(
        issuer: impl Into<String>,
        source_id: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let source_id = source_id.into();
        let target = target.into();
        Self {
            id: format!("avoid_{source_id}_for_{target}"),
            source_id,
            target,
            issuer: issuer.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Policy for AvoidPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn code(&self) -> PolicyCode {
        PolicyCode::Avoid
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn description(&self) -> String {
        format!(
            "source {} will not be used for connections to {}",
            self.source_id, self.target
        )
    }

    fn accept(&self, source: &str, target: Target<'_>) -> bool {
        match target {
            Target::Any => true,
            Target::Addr(addr) => !(source == self.source_id && addr == self.target),
        }
    }
}

/// Looks up the source a target was last bound to. Returns `None` when the
/// target has no binding yet.
pub type HistoryLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Pins each target to the first source that served it: once a binding
/// exists, only that source accepts further requests for the target.
pub struct StickyPolicy {
    issuer: String,
    history: HistoryLookup,
}

impl StickyPolicy {
    pub fn new(issuer: impl Into<String>, history: HistoryLookup) -> Self {
        Self {
            issuer: issuer.into(),
            history,
        }
    }
}

impl Policy for StickyPolicy {
    fn id(&self) -> &str {
        "stick"
    }

    fn code(&self) -> PolicyCode {
        PolicyCode::Sticky
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn description(&self) -> String {
        "once a source receives a connection to a target, the following connections \
         to the same target will be assigned to the same source"
            .to_string()
    }

    fn accept(&self, source: &str, target: Target<'_>) -> bool {
        match target {
            Target::Any => true,
            Target::Addr(addr) => match (self.history)(addr) {
                Some(bound) => bound == source,
                None => true,
            },
        }
    }
}

/// General purpose policy with a caller-supplied accept function.
///
/// Used mainly in tests.
pub struct GenPolicy {
    id: String,
    issuer: String,
    #[allow(clippy::type_complexity)]
    accept_fn: Box<dyn Fn(&str, Target<'_>) -> bool + Send + Sync>,
}

impl GenPolicy {
    pub fn new(
        id: impl Into<String>,
        accept_fn: impl Fn(&str, Target<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            issuer: "test".to_string(),
            accept_fn: Box::new(accept_fn),
        }
    }
}

impl Policy for GenPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn code(&self) -> PolicyCode {
        PolicyCode::Generic
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn description(&self) -> String {
        format!("generic policy {}", self.id)
    }

    fn accept(&self, source: &str, target: Target<'_>) -> bool {
        (self.accept_fn)(source, target)
    }
}
