//! Event logging for the pass pipeline.
//!
//! Every rewrite a pass performs, and every candidate it declines, is recorded as an
//! [`Event`]. The log is append-only and thread-safe, so functions compiled concurrently
//! share one log through the [`CompilerContext`](crate::compiler::CompilerContext).
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Collection of events with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//!
//! # Example
//!
//! ```rust
//! use matssa::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::LoopRemoved)
//!     .at("f", 3)
//!     .message("empty range 1:0:1");
//! log.info("recipe finished");
//!
//! assert_eq!(log.count_kind(EventKind::LoopRemoved), 1);
//! assert_eq!(log.summary(), "1 loop removed");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An instruction was rewritten in place.
    InstructionRewritten,
    /// A dead instruction was removed.
    InstructionRemoved,
    /// A loop with an empty range was removed.
    LoopRemoved,
    /// A single-iteration loop was inlined.
    LoopCollapsed,
    /// Two adjacent loops were fused.
    LoopsFused,
    /// The two levels of a loop nest were swapped.
    LoopsInterchanged,
    /// An allocation was rewritten to a cheaper form.
    AllocationSimplified,
    /// An allocation was removed.
    AllocationRemoved,
    /// A reduction call was expanded into a loop.
    ReductionExpanded,
    /// A concatenation was expanded into element writes.
    ConcatenationExpanded,
    /// A matrix access was lowered to simpler accesses or loops.
    AccessLowered,
    /// A branch on a constant condition was removed.
    BranchRemoved,
    /// Blocks were renumbered.
    BlocksReordered,

    /// A candidate pattern was found but a precondition could not be proven.
    PatternDeclined,
    /// A pass started.
    PassStarted,
    /// A pass completed.
    PassCompleted,
    /// Compilation of a function started.
    FunctionStarted,
    /// Compilation of a function completed.
    FunctionCompleted,
    /// A function body passed validation.
    ValidationPassed,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::InstructionRewritten => "instruction rewritten",
            Self::InstructionRemoved => "instruction removed",
            Self::LoopRemoved => "loop removed",
            Self::LoopCollapsed => "loop collapsed",
            Self::LoopsFused => "loops fused",
            Self::LoopsInterchanged => "loops interchanged",
            Self::AllocationSimplified => "allocation simplified",
            Self::AllocationRemoved => "allocation removed",
            Self::ReductionExpanded => "reduction expanded",
            Self::ConcatenationExpanded => "concatenation expanded",
            Self::AccessLowered => "access lowered",
            Self::BranchRemoved => "branch removed",
            Self::BlocksReordered => "blocks reordered",
            // Engine
            Self::PatternDeclined => "pattern declined",
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::FunctionStarted => "function started",
            Self::FunctionCompleted => "function completed",
            Self::ValidationPassed => "validation passed",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::InstructionRewritten
                | Self::InstructionRemoved
                | Self::LoopRemoved
                | Self::LoopCollapsed
                | Self::LoopsFused
                | Self::LoopsInterchanged
                | Self::AllocationSimplified
                | Self::AllocationRemoved
                | Self::ReductionExpanded
                | Self::ConcatenationExpanded
                | Self::AccessLowered
                | Self::BranchRemoved
                | Self::BlocksReordered
        )
    }

    /// Returns true if this is a diagnostic event (declined pattern, info, warning, error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::PatternDeclined | Self::Info | Self::Warning | Self::Error
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function where the event occurred (if applicable).
    pub function: Option<String>,
    /// Block within the function.
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = &self.function {
            write!(f, " {function}")?;
            if let Some(block) = self.location {
                write!(f, "#{block}")?;
            }
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added
/// to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<String>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function and block where the event occurred.
    pub fn at(mut self, function: impl Into<String>, block: usize) -> Self {
        self.function = Some(function.into());
        self.location = Some(block);
        self
    }

    /// Sets only the function (for function-level events).
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets the block.
    pub fn location(mut self, block: usize) -> Self {
        self.location = Some(block);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            function: self.function.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from a pipeline run.
///
/// This type is thread-safe: events can be appended concurrently from
/// multiple threads using shared references (`&self`).
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is automatically added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events of a specific function.
    pub fn filter_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter()
            .filter(move |e| e.function.as_deref() == Some(function))
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over diagnostic events only.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_diagnostic())
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of transformation events.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.transformations().count()
    }

    /// Returns the number of unique functions with transformation events.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.function.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of all transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let counts = self.count_by_kind();

        let mut parts: Vec<String> = counts
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Iterator wrapper for EventLog that yields &Event
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, e)| e)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        EventLogIter {
            inner: self.events.iter(),
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}
