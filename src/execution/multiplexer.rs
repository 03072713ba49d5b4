//! Assembles the interpreter's events for one request into an ordered
//! artifact sequence.
//!
//! Artifacts are numbered in arrival order, which is the interpreter's
//! emission order: everything travels over the same pipe. Consecutive writes
//! to the same stream are coalesced into one Text artifact; any other artifact
//! in between starts a new one.

use std::str::FromStr;

use super::{
    protocol::{Event, EventSink, Progress, ProtocolViolation},
    Artifact, ArtifactPayload, ErrorInfo, ExecutionResult, PlotPayload, StreamName, TextOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Only a trailing expression statement is displayed.
    #[default]
    LastExpr,
    /// A trailing single-name assignment displays the assigned value too.
    LastExprOrAssign,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "last_expr" => Ok(Self::LastExpr),
            "last_expr_or_assign" => Ok(Self::LastExprOrAssign),
            other => Err(format!("unknown display mode: {other}")),
        }
    }
}

/// The auto-display rule for the trailing top-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRule {
    pub mode: DisplayMode,
    /// Binding the trailing value to this name suppresses display.
    pub ignore_target: String,
}

impl Default for DisplayRule {
    fn default() -> Self {
        Self {
            mode: DisplayMode::default(),
            ignore_target: "_".to_string(),
        }
    }
}

impl DisplayRule {
    /// `target` is `None` for an expression statement and the bound name for
    /// an assignment.
    pub fn should_display(&self, target: Option<&str>, is_none: bool) -> bool {
        if is_none {
            return false;
        }
        match target {
            None => true,
            Some(name) if name == self.ignore_target => false,
            Some(_) => self.mode == DisplayMode::LastExprOrAssign,
        }
    }
}

pub struct Multiplexer {
    request: u64,
    rule: DisplayRule,
    artifacts: Vec<Artifact>,
    stdout: String,
    stderr: String,
    error: Option<ErrorInfo>,
}

impl Multiplexer {
    pub fn new(request: u64, rule: DisplayRule) -> Self {
        Self {
            request,
            rule,
            artifacts: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    pub fn finish(self) -> ExecutionResult {
        ExecutionResult::from_parts(self.stdout, self.stderr, self.artifacts, self.error)
    }

    fn push(&mut self, payload: ArtifactPayload) {
        let order = self.artifacts.len();
        self.artifacts.push(Artifact::new(payload, order));
    }

    fn append_text(&mut self, stream: StreamName, text: String) {
        match stream {
            StreamName::Stdout => self.stdout.push_str(&text),
            StreamName::Stderr => self.stderr.push_str(&text),
        }
        if let Some(last) = self.artifacts.last_mut() {
            if let ArtifactPayload::Text(out) = last.payload_mut() {
                if out.stream == stream {
                    out.text.push_str(&text);
                    return;
                }
            }
        }
        self.push(ArtifactPayload::Text(TextOutput { stream, text }));
    }
}

impl EventSink for Multiplexer {
    fn request(&self) -> u64 {
        self.request
    }

    fn observe(&mut self, event: Event) -> Result<Progress, ProtocolViolation> {
        self.check_request(&event)?;
        match event {
            Event::Stream { name, text, .. } => self.append_text(name, text),
            Event::Result {
                target,
                none,
                repr,
                table,
                ..
            } => {
                if self.rule.should_display(target.as_deref(), none) {
                    match table {
                        Some(table) => self.push(ArtifactPayload::Table(table)),
                        None => self.push(ArtifactPayload::Value(repr.unwrap_or_default())),
                    }
                }
            }
            Event::Plot {
                png,
                width_px,
                height_px,
                width_in,
                height_in,
                dpi,
                default_size,
                ..
            } => self.push(ArtifactPayload::Plot(PlotPayload {
                png_base64: png,
                width_px,
                height_px,
                width_in,
                height_in,
                dpi,
                default_size,
            })),
            Event::Error {
                ename,
                message,
                traceback,
                ..
            } => {
                let info = ErrorInfo {
                    name: ename,
                    message,
                    trace: traceback.filter(|t| !t.is_empty()),
                };
                self.push(ArtifactPayload::Error(info.clone()));
                self.error = Some(info);
            }
            Event::Done { names, .. } => return Ok(Progress::Done(names)),
            other @ (Event::Ready { .. } | Event::Analysis { .. }) => {
                return Err(ProtocolViolation::Unexpected(other.kind()));
            }
        }
        Ok(Progress::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ArtifactKind, TablePayload};

    fn stream(id: u64, name: StreamName, text: &str) -> Event {
        Event::Stream {
            id,
            name,
            text: text.to_string(),
        }
    }

    fn result(id: u64, target: Option<&str>, repr: &str) -> Event {
        Event::Result {
            id,
            target: target.map(str::to_string),
            none: false,
            repr: Some(repr.to_string()),
            table: None,
        }
    }

    fn done(id: u64) -> Event {
        Event::Done { id, names: vec![] }
    }

    fn run(rule: DisplayRule, events: Vec<Event>) -> ExecutionResult {
        let mut mux = Multiplexer::new(1, rule);
        for event in events {
            if let Progress::Done(_) = mux.observe(event).unwrap() {
                break;
            }
        }
        mux.finish()
    }

    #[test]
    fn trailing_expression_becomes_value() {
        let result = run(DisplayRule::default(), vec![result(1, None, "2"), done(1)]);
        assert_eq!(result.kinds(), vec![ArtifactKind::Value]);
        assert_eq!(result.value(), Some("2"));
        assert_eq!(result.artifacts()[0].order(), 0);
        assert_eq!(result.stdout(), "");
        assert!(result.error().is_none());
    }

    #[test]
    fn ignore_target_suppresses_display() {
        let result = run(DisplayRule::default(), vec![result(1, Some("_"), "[<Line2D>]"), done(1)]);
        assert!(result.artifacts().is_empty());
    }

    #[test]
    fn trailing_assignment_follows_display_mode() {
        let hidden = run(DisplayRule::default(), vec![result(1, Some("x"), "5"), done(1)]);
        assert!(hidden.artifacts().is_empty());

        let rule = DisplayRule {
            mode: DisplayMode::LastExprOrAssign,
            ..DisplayRule::default()
        };
        let shown = run(rule.clone(), vec![result(1, Some("x"), "5"), done(1)]);
        assert_eq!(shown.value(), Some("5"));
        // The ignore target stays silent in either mode.
        let ignored = run(rule, vec![result(1, Some("_"), "5"), done(1)]);
        assert!(ignored.artifacts().is_empty());
    }

    #[test]
    fn none_is_never_displayed() {
        let event = Event::Result {
            id: 1,
            target: None,
            none: true,
            repr: None,
            table: None,
        };
        let result = run(DisplayRule::default(), vec![event, done(1)]);
        assert!(result.artifacts().is_empty());
    }

    #[test]
    fn consecutive_writes_coalesce_until_another_artifact() {
        let events = vec![
            stream(1, StreamName::Stdout, "a"),
            stream(1, StreamName::Stdout, "\n"),
            stream(1, StreamName::Stderr, "warn\n"),
            stream(1, StreamName::Stdout, "b\n"),
            result(1, None, "3"),
            done(1),
        ];
        let result = run(DisplayRule::default(), events);
        assert_eq!(
            result.kinds(),
            vec![ArtifactKind::Text, ArtifactKind::Text, ArtifactKind::Text, ArtifactKind::Value]
        );
        assert_eq!(result.stdout(), "a\nb\n");
        assert_eq!(result.stderr(), "warn\n");
        match result.artifacts()[0].payload() {
            ArtifactPayload::Text(out) => assert_eq!(out.text, "a\n"),
            other => panic!("expected text, got {other:?}"),
        }
        let orders: Vec<usize> = result.artifacts().iter().map(Artifact::order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[test]
    fn emission_order_is_kept_across_kinds() {
        let plot = Event::Plot {
            id: 1,
            png: "iVBORw0KGgo=".into(),
            width_px: 640,
            height_px: 480,
            width_in: 6.4,
            height_in: 4.8,
            dpi: 100.0,
            default_size: true,
        };
        let events = vec![
            stream(1, StreamName::Stdout, "before\n"),
            plot,
            stream(1, StreamName::Stdout, "after\n"),
            done(1),
        ];
        let result = run(DisplayRule::default(), events);
        assert_eq!(
            result.kinds(),
            vec![ArtifactKind::Text, ArtifactKind::Plot, ArtifactKind::Text]
        );
        let plot = result.plots().next().unwrap();
        assert_eq!(plot.data_uri(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn table_values_become_table_artifacts() {
        let table = TablePayload {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec!["1".into(), "2".into()]],
            total_rows: 1,
            truncated: false,
        };
        let event = Event::Result {
            id: 1,
            target: None,
            none: false,
            repr: Some("   a  b\n0  1  2".into()),
            table: Some(table.clone()),
        };
        let result = run(DisplayRule::default(), vec![event, done(1)]);
        assert_eq!(result.kinds(), vec![ArtifactKind::Table]);
        assert_eq!(result.artifacts()[0].payload(), &ArtifactPayload::Table(table));
        assert_eq!(result.value(), None);
    }

    #[test]
    fn error_is_recorded_as_artifact_and_result_error() {
        let events = vec![
            stream(1, StreamName::Stdout, "partial\n"),
            Event::Error {
                id: Some(1),
                ename: "ValueError".into(),
                message: "x".into(),
                traceback: Some("Traceback (most recent call last):\nValueError: x\n".into()),
            },
            done(1),
        ];
        let result = run(DisplayRule::default(), events);
        assert_eq!(result.kinds(), vec![ArtifactKind::Text, ArtifactKind::Error]);
        let error = result.error().unwrap();
        assert_eq!(error.message, "x");
        assert_eq!(error.name, "ValueError");
        assert!(error.trace.as_deref().unwrap().contains("ValueError: x"));
        assert!(!result.is_success());
    }

    #[test]
    fn events_for_other_requests_are_violations() {
        let mut mux = Multiplexer::new(7, DisplayRule::default());
        let err = mux.observe(result(8, None, "1")).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::MismatchedRequest {
                expected: 7,
                got: Some(8)
            }
        );
    }

    #[test]
    fn analysis_during_execution_is_a_violation() {
        let mut mux = Multiplexer::new(1, DisplayRule::default());
        let event = Event::Analysis {
            id: 1,
            loads: vec![],
            stores: vec![],
            sources: vec![],
            star_imports: vec![],
        };
        assert_eq!(mux.observe(event).unwrap_err(), ProtocolViolation::Unexpected("analysis"));
    }

    #[test]
    fn done_reports_names() {
        let mut mux = Multiplexer::new(1, DisplayRule::default());
        let progress = mux
            .observe(Event::Done {
                id: 1,
                names: vec!["df".into()],
            })
            .unwrap();
        assert_eq!(progress, Progress::Done(vec!["df".into()]));
    }

    #[test]
    fn display_mode_parses() {
        assert_eq!("last_expr".parse::<DisplayMode>(), Ok(DisplayMode::LastExpr));
        assert!("all".parse::<DisplayMode>().is_err());
    }
}
