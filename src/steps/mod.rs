//! Step registry: phrase patterns bound to typed executors
//!
//! A step is registered as a regular expression plus a plain `fn` taking the
//! scenario context and one argument per capture group. Captures are parsed
//! through [`FromCapture`] before the executor runs, so a bad number or an
//! unknown runtime name fails the step as a configuration error without
//! touching the cluster.
//!
//! ```ignore
//! fn deploy(ctx: &mut ScenarioContext, runtime: Runtime, name: String, options: RuntimeOptions) -> StepFuture<'_> {
//!     Box::pin(async move {
//!         ctx.deploy_runtime(&name, runtime, &options).await?;
//!         Ok(())
//!     })
//! }
//!
//! registry.step_with_table(r#"Deploy (quarkus|springboot) runtime "([^"]*)""#, deploy)?;
//! ```
//!
//! Patterns are anchored. Before a run starts the registry is sealed against
//! every phrase the loaded features use: a phrase matching two patterns is
//! rejected then, not when the scenario reaches it.

mod operator;
mod source;
pub mod table;
mod workload;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

use crate::context::{ContextError, ScenarioContext};
use crate::image::{ImageError, ImageRole};
use crate::olm::DependencyOperator;
use crate::wait::ConditionError;
use crate::workload::Runtime;
use table::{parse_flag, DataTable, MapperError, TableOptions};

/// Future returned by a step executor
pub type StepFuture<'a> = BoxFuture<'a, Result<(), StepError>>;

/// Category of a step failure, as reported per scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Bad input: unknown phrase, argument, table key or image
    Configuration,
    /// The cluster refused or could not be reached
    Platform,
    Timeout,
    /// A condition was evaluated and found false
    Assertion,
    /// An external tool (git, maven, oc) failed
    Subprocess,
    Cancelled,
}

impl FailureKind {
    pub(crate) fn of_wait(err: &ConditionError) -> Self {
        match err {
            ConditionError::Timeout(_) => FailureKind::Timeout,
            ConditionError::Failed { .. } => FailureKind::Assertion,
            ConditionError::Cancelled(_) => FailureKind::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Platform => "platform",
            FailureKind::Timeout => "timeout",
            FailureKind::Assertion => "assertion",
            FailureKind::Subprocess => "subprocess",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problems with the set of registered patterns
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid step pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("step pattern '{pattern}' has {captures} capture groups but its executor takes {arity} arguments")]
    ArityMismatch {
        pattern: String,
        captures: usize,
        arity: usize,
    },

    #[error("step pattern '{0}' registered twice")]
    Duplicate(String),

    #[error("step '{phrase}' matches more than one pattern: {}", patterns.join(", "))]
    Ambiguous { phrase: String, patterns: Vec<String> },

    #[error("no step matches '{0}'")]
    Undefined(String),
}

/// Why a step failed
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Table(#[from] MapperError),

    #[error("argument {index} '{value}': {reason}")]
    Argument {
        index: usize,
        value: String,
        reason: String,
    },

    #[error("step does not take a {0}")]
    UnexpectedPayload(&'static str),

    #[error("step needs a doc string")]
    MissingPayload,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Assertion(String),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StepError>,
    },
}

impl StepError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::Context(e) => e.kind(),
            StepError::Assertion(_) => FailureKind::Assertion,
            StepError::WithContext { source, .. } => source.kind(),
            StepError::Registry(_)
            | StepError::Table(_)
            | StepError::Argument { .. }
            | StepError::UnexpectedPayload(_)
            | StepError::MissingPayload => FailureKind::Configuration,
        }
    }

    /// Prefix the message with what the step was doing
    pub fn context(self, context: impl Into<String>) -> Self {
        StepError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<ImageError> for StepError {
    fn from(err: ImageError) -> Self {
        StepError::Context(err.into())
    }
}

impl From<ConditionError> for StepError {
    fn from(err: ConditionError) -> Self {
        StepError::Context(err.into())
    }
}

/// What follows a step line in a feature file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    None,
    Table(DataTable),
    DocString(String),
}

impl Payload {
    fn describe(&self) -> &'static str {
        match self {
            Payload::None => "nothing",
            Payload::Table(_) => "table",
            Payload::DocString(_) => "doc string",
        }
    }
}

/// A value parsed from one capture group
pub trait FromCapture: Sized {
    fn from_capture(value: &str) -> Result<Self, String>;
}

impl FromCapture for String {
    fn from_capture(value: &str) -> Result<Self, String> {
        Ok(value.to_string())
    }
}

macro_rules! from_capture_via_parse {
    ($($ty:ty),*) => {
        $(
            impl FromCapture for $ty {
                fn from_capture(value: &str) -> Result<Self, String> {
                    value.trim().parse().map_err(|e| format!("{e}"))
                }
            }
        )*
    };
}

from_capture_via_parse!(u32, u64, usize, i32, i64);

impl FromCapture for bool {
    fn from_capture(value: &str) -> Result<Self, String> {
        parse_flag(value).ok_or_else(|| "expected true/false, yes/no or enabled/disabled".to_string())
    }
}

impl FromCapture for Runtime {
    fn from_capture(value: &str) -> Result<Self, String> {
        value.parse()
    }
}

impl FromCapture for ImageRole {
    fn from_capture(value: &str) -> Result<Self, String> {
        value.parse().map_err(|e: ImageError| e.to_string())
    }
}

impl FromCapture for DependencyOperator {
    fn from_capture(value: &str) -> Result<Self, String> {
        value.parse().map_err(|e: crate::olm::OlmError| e.to_string())
    }
}

/// `N minutes` in a phrase
pub fn minutes(count: u64) -> Duration {
    Duration::from_secs(count * 60)
}

/// The tuple of arguments an executor takes from the capture groups
pub trait CaptureArgs: Sized + Send + 'static {
    const ARITY: usize;

    fn parse(captures: &[String]) -> Result<Self, StepError>;
}

fn capture<T: FromCapture>(captures: &[String], index: usize) -> Result<T, StepError> {
    let value = captures.get(index).map(String::as_str).unwrap_or_default();
    T::from_capture(value).map_err(|reason| StepError::Argument {
        index: index + 1,
        value: value.to_string(),
        reason,
    })
}

macro_rules! impl_capture_args {
    ($arity:expr; $($name:ident : $index:tt),*) => {
        impl<$($name: FromCapture + Send + 'static),*> CaptureArgs for ($($name,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn parse(captures: &[String]) -> Result<Self, StepError> {
                Ok(($(capture::<$name>(captures, $index)?,)*))
            }
        }
    };
}

impl_capture_args!(0;);
impl_capture_args!(1; A: 0);
impl_capture_args!(2; A: 0, B: 1);
impl_capture_args!(3; A: 0, B: 1, C: 2);
impl_capture_args!(4; A: 0, B: 1, C: 2, D: 3);

/// Executor of a step without a payload
pub trait Handler<Args>: Send + Sync + 'static {
    fn call<'a>(&self, ctx: &'a mut ScenarioContext, args: Args) -> StepFuture<'a>;
}

/// Executor of a step with an optional `key | value` table
pub trait TableHandler<Args, T>: Send + Sync + 'static {
    fn call<'a>(&self, ctx: &'a mut ScenarioContext, args: Args, options: T) -> StepFuture<'a>;
}

/// Executor of a step followed by a doc string
pub trait DocStringHandler<Args>: Send + Sync + 'static {
    fn call<'a>(&self, ctx: &'a mut ScenarioContext, args: Args, text: String) -> StepFuture<'a>;
}

macro_rules! impl_handlers {
    ($($name:ident),*) => {
        impl<F, $($name),*> Handler<($($name,)*)> for F
        where
            F: for<'a> Fn(&'a mut ScenarioContext, $($name),*) -> StepFuture<'a> + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn call<'a>(&self, ctx: &'a mut ScenarioContext, ($($name,)*): ($($name,)*)) -> StepFuture<'a> {
                (self)(ctx, $($name),*)
            }
        }

        impl<F, T, $($name),*> TableHandler<($($name,)*), T> for F
        where
            F: for<'a> Fn(&'a mut ScenarioContext, $($name,)* T) -> StepFuture<'a> + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn call<'a>(&self, ctx: &'a mut ScenarioContext, ($($name,)*): ($($name,)*), options: T) -> StepFuture<'a> {
                (self)(ctx, $($name,)* options)
            }
        }

        impl<F, $($name),*> DocStringHandler<($($name,)*)> for F
        where
            F: for<'a> Fn(&'a mut ScenarioContext, $($name,)* String) -> StepFuture<'a> + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn call<'a>(&self, ctx: &'a mut ScenarioContext, ($($name,)*): ($($name,)*), text: String) -> StepFuture<'a> {
                (self)(ctx, $($name,)* text)
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A);
impl_handlers!(B1, B2);
impl_handlers!(C1, C2, C3);
impl_handlers!(D1, D2, D3, D4);

/// Executor with its argument types erased
trait ErasedStep: Send + Sync {
    /// Parse captures and payload without running anything
    fn check(&self, captures: &[String], payload: &Payload) -> Result<(), StepError>;

    fn call<'a>(&self, ctx: &'a mut ScenarioContext, captures: &[String], payload: &Payload) -> StepFuture<'a>;
}

fn failed<'a>(err: StepError) -> StepFuture<'a> {
    Box::pin(async move { Err(err) })
}

struct Plain<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> Plain<H, Args>
where
    Args: CaptureArgs,
{
    fn parse(&self, captures: &[String], payload: &Payload) -> Result<Args, StepError> {
        match payload {
            Payload::None => Args::parse(captures),
            other => Err(StepError::UnexpectedPayload(other.describe())),
        }
    }
}

impl<H, Args> ErasedStep for Plain<H, Args>
where
    H: Handler<Args>,
    Args: CaptureArgs,
{
    fn check(&self, captures: &[String], payload: &Payload) -> Result<(), StepError> {
        self.parse(captures, payload).map(|_| ())
    }

    fn call<'a>(&self, ctx: &'a mut ScenarioContext, captures: &[String], payload: &Payload) -> StepFuture<'a> {
        match self.parse(captures, payload) {
            Ok(args) => self.handler.call(ctx, args),
            Err(e) => failed(e),
        }
    }
}

struct WithTable<H, Args, T> {
    handler: H,
    _args: PhantomData<fn() -> (Args, T)>,
}

impl<H, Args, T> WithTable<H, Args, T>
where
    Args: CaptureArgs,
    T: TableOptions,
{
    fn parse(&self, captures: &[String], payload: &Payload) -> Result<(Args, T), StepError> {
        let args = Args::parse(captures)?;
        let options = match payload {
            Payload::None => T::default(),
            Payload::Table(table) => T::from_table(table)?,
            Payload::DocString(_) => return Err(StepError::UnexpectedPayload("doc string")),
        };
        Ok((args, options))
    }
}

impl<H, Args, T> ErasedStep for WithTable<H, Args, T>
where
    H: TableHandler<Args, T>,
    Args: CaptureArgs,
    T: TableOptions,
{
    fn check(&self, captures: &[String], payload: &Payload) -> Result<(), StepError> {
        self.parse(captures, payload).map(|_| ())
    }

    fn call<'a>(&self, ctx: &'a mut ScenarioContext, captures: &[String], payload: &Payload) -> StepFuture<'a> {
        match self.parse(captures, payload) {
            Ok((args, options)) => self.handler.call(ctx, args, options),
            Err(e) => failed(e),
        }
    }
}

struct WithDocString<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> WithDocString<H, Args>
where
    Args: CaptureArgs,
{
    fn parse(&self, captures: &[String], payload: &Payload) -> Result<(Args, String), StepError> {
        let args = Args::parse(captures)?;
        match payload {
            Payload::DocString(text) => Ok((args, text.clone())),
            Payload::None => Err(StepError::MissingPayload),
            Payload::Table(_) => Err(StepError::UnexpectedPayload("table")),
        }
    }
}

impl<H, Args> ErasedStep for WithDocString<H, Args>
where
    H: DocStringHandler<Args>,
    Args: CaptureArgs,
{
    fn check(&self, captures: &[String], payload: &Payload) -> Result<(), StepError> {
        self.parse(captures, payload).map(|_| ())
    }

    fn call<'a>(&self, ctx: &'a mut ScenarioContext, captures: &[String], payload: &Payload) -> StepFuture<'a> {
        match self.parse(captures, payload) {
            Ok((args, text)) => self.handler.call(ctx, args, text),
            Err(e) => failed(e),
        }
    }
}

struct Binding {
    source: String,
    pattern: Regex,
    step: Box<dyn ErasedStep>,
}

/// Phrase patterns and their executors
#[derive(Default)]
pub struct StepRegistry {
    bindings: Vec<Binding>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, pattern: &str, arity: usize, step: Box<dyn ErasedStep>) -> Result<&mut Self, RegistryError> {
        if self.bindings.iter().any(|b| b.source == pattern) {
            return Err(RegistryError::Duplicate(pattern.to_string()));
        }
        let anchored = format!(
            "^(?:{})$",
            pattern.trim_start_matches('^').trim_end_matches('$')
        );
        let regex = Regex::new(&anchored).map_err(|e| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let captures = regex.captures_len() - 1;
        if captures != arity {
            return Err(RegistryError::ArityMismatch {
                pattern: pattern.to_string(),
                captures,
                arity,
            });
        }

        self.bindings.push(Binding {
            source: pattern.to_string(),
            pattern: regex,
            step,
        });
        Ok(self)
    }

    /// Bind `pattern` to an executor taking one argument per capture group
    pub fn step<Args, H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RegistryError>
    where
        Args: CaptureArgs,
        H: Handler<Args>,
    {
        self.bind(
            pattern,
            Args::ARITY,
            Box::new(Plain {
                handler,
                _args: PhantomData,
            }),
        )
    }

    /// Like [`step`](Self::step), with the options table as last argument
    ///
    /// Without a table the executor gets `T::default()`.
    pub fn step_with_table<Args, T, H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RegistryError>
    where
        Args: CaptureArgs,
        T: TableOptions,
        H: TableHandler<Args, T>,
    {
        self.bind(
            pattern,
            Args::ARITY,
            Box::new(WithTable {
                handler,
                _args: PhantomData,
            }),
        )
    }

    pub fn step_with_docstring<Args, H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RegistryError>
    where
        Args: CaptureArgs,
        H: DocStringHandler<Args>,
    {
        self.bind(
            pattern,
            Args::ARITY,
            Box::new(WithDocString {
                handler,
                _args: PhantomData,
            }),
        )
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Registered patterns, in registration order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.source.as_str())
    }

    /// The single binding matching `phrase`, with its capture values
    fn find(&self, phrase: &str) -> Result<(&Binding, Vec<String>), RegistryError> {
        let mut matched = self
            .bindings
            .iter()
            .filter_map(|b| b.pattern.captures(phrase).map(|c| (b, c)));

        let Some((binding, captures)) = matched.next() else {
            return Err(RegistryError::Undefined(phrase.to_string()));
        };
        let others: Vec<&Binding> = matched.map(|(b, _)| b).collect();
        if !others.is_empty() {
            return Err(RegistryError::Ambiguous {
                phrase: phrase.to_string(),
                patterns: std::iter::once(binding)
                    .chain(others)
                    .map(|b| b.source.clone())
                    .collect(),
            });
        }

        let values = captures
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        Ok((binding, values))
    }

    /// Reject any of `phrases` that more than one pattern matches
    ///
    /// Undefined phrases are left to [`check`](Self::check), which reports
    /// them against the scenario using them.
    pub fn seal<'p>(&self, phrases: impl IntoIterator<Item = &'p str>) -> Result<(), RegistryError> {
        for phrase in phrases {
            match self.find(phrase) {
                Err(e @ RegistryError::Ambiguous { .. }) => return Err(e),
                _ => continue,
            }
        }
        debug!(patterns = self.bindings.len(), "Step registry sealed");
        Ok(())
    }

    /// Resolve `phrase` and parse its arguments without running it
    pub fn check(&self, phrase: &str, payload: &Payload) -> Result<(), StepError> {
        let (binding, captures) = self.find(phrase)?;
        binding.step.check(&captures, payload)
    }

    /// Run the executor bound to `phrase`
    pub fn dispatch<'a>(&self, ctx: &'a mut ScenarioContext, phrase: &str, payload: &Payload) -> StepFuture<'a> {
        match self.find(phrase) {
            Ok((binding, captures)) => binding.step.call(ctx, &captures, payload),
            Err(e) => failed(e.into()),
        }
    }
}

/// Registry with every built-in phrase
pub fn default_registry() -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();
    operator::register(&mut registry)?;
    workload::register(&mut registry)?;
    source::register(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::services;
    use crate::gateway::MemoryCluster;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    struct Greeting {
        loud: bool,
    }

    impl TableOptions for Greeting {
        const FIELDS: &'static [table::OptionField] = &[table::OptionField::flag("loud")];
    }

    fn greet(ctx: &mut ScenarioContext, name: String, times: u32) -> StepFuture<'_> {
        Box::pin(async move {
            ctx.remember(name, times.to_string());
            Ok(())
        })
    }

    fn greet_with(ctx: &mut ScenarioContext, name: String, options: Greeting) -> StepFuture<'_> {
        Box::pin(async move {
            ctx.remember(name, if options.loud { "LOUD" } else { "quiet" });
            Ok(())
        })
    }

    fn note(ctx: &mut ScenarioContext, text: String) -> StepFuture<'_> {
        Box::pin(async move {
            ctx.remember("note", text);
            Ok(())
        })
    }

    fn nothing(_ctx: &mut ScenarioContext) -> StepFuture<'_> {
        Box::pin(async { Err(StepError::Assertion("nothing happened".to_string())) })
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .step(r#"greet "([^"]*)" (\d+) times?"#, greet)
            .unwrap()
            .step_with_table(r#"greet "([^"]*)" with options"#, greet_with)
            .unwrap()
            .step_with_docstring("a note", note)
            .unwrap()
            .step("nothing happens", nothing)
            .unwrap();
        registry
    }

    fn context() -> ScenarioContext {
        ScenarioContext::new(services(Arc::new(MemoryCluster::new())), "steps", [])
    }

    #[tokio::test]
    async fn test_dispatch_parses_captures() {
        let registry = registry();
        let mut ctx = context();

        registry
            .dispatch(&mut ctx, r#"greet "bob" 3 times"#, &Payload::None)
            .await
            .unwrap();
        assert_eq!(ctx.reference("bob"), Some("3"));
    }

    #[tokio::test]
    async fn test_table_is_optional() {
        let registry = registry();
        let mut ctx = context();

        registry
            .dispatch(&mut ctx, r#"greet "ann" with options"#, &Payload::None)
            .await
            .unwrap();
        assert_eq!(ctx.reference("ann"), Some("quiet"));

        let table = Payload::Table(DataTable::from([["loud", "yes"]]));
        registry
            .dispatch(&mut ctx, r#"greet "ann" with options"#, &table)
            .await
            .unwrap();
        assert_eq!(ctx.reference("ann"), Some("LOUD"));
    }

    #[tokio::test]
    async fn test_docstring_step() {
        let registry = registry();
        let mut ctx = context();

        let err = registry.check("a note", &Payload::None).unwrap_err();
        assert!(matches!(err, StepError::MissingPayload));

        registry
            .dispatch(&mut ctx, "a note", &Payload::DocString("hello".to_string()))
            .await
            .unwrap();
        assert_eq!(ctx.reference("note"), Some("hello"));
    }

    #[test]
    fn test_check_reports_bad_argument() {
        let err = registry()
            .check(r#"greet "bob" 99999999999 times"#, &Payload::None)
            .unwrap_err();
        match &err {
            StepError::Argument { index, value, .. } => {
                assert_eq!(*index, 2);
                assert_eq!(value, "99999999999");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[test]
    fn test_check_rejects_unknown_table_key() {
        let table = Payload::Table(DataTable::from([["colour", "red"]]));
        let err = registry().check(r#"greet "ann" with options"#, &table).unwrap_err();
        assert!(err.to_string().contains("unknown table key 'colour'"));
    }

    #[test]
    fn test_plain_step_rejects_table() {
        let table = Payload::Table(DataTable::from([["loud", "yes"]]));
        let err = registry().check("nothing happens", &table).unwrap_err();
        assert!(matches!(err, StepError::UnexpectedPayload("table")));
    }

    #[test]
    fn test_patterns_are_anchored() {
        let err = registry().check("nothing happens at all", &Payload::None).unwrap_err();
        assert!(matches!(err, StepError::Registry(RegistryError::Undefined(_))));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let mut registry = StepRegistry::new();
        registry
            .step("nothing happens|nothing happened", nothing)
            .unwrap()
            .step("nothing happens at all", nothing)
            .unwrap();

        registry.seal(["nothing happens at all", "nothing happened"]).unwrap();
        assert!(registry.check("nothing happened", &Payload::None).is_ok());
        let err = registry.check("nothing happened twice", &Payload::None).unwrap_err();
        assert!(matches!(err, StepError::Registry(RegistryError::Undefined(_))));
    }

    #[test]
    fn test_arity_mismatch_rejected_at_registration() {
        let mut registry = StepRegistry::new();
        let err = registry.step(r#"greet "([^"]*)""#, greet).unwrap_err();
        assert_eq!(
            err,
            RegistryError::ArityMismatch {
                pattern: r#"greet "([^"]*)""#.to_string(),
                captures: 1,
                arity: 2,
            }
        );
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut registry = registry();
        let err = registry.step("nothing happens", nothing).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("nothing happens".to_string()));
    }

    #[test]
    fn test_seal_detects_ambiguity() {
        let mut registry = registry();
        registry.step(r"nothing (\w+)", greet_one).unwrap();

        registry.seal(["a note", "unknown phrase"]).unwrap();
        let err = registry.seal(["nothing happens"]).unwrap_err();
        match err {
            RegistryError::Ambiguous { patterns, .. } => assert_eq!(patterns.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn greet_one(ctx: &mut ScenarioContext, name: String) -> StepFuture<'_> {
        Box::pin(async move {
            ctx.remember(name, "1");
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_failure_kind_follows_error() {
        let registry = registry();
        let mut ctx = context();
        let err = registry
            .dispatch(&mut ctx, "nothing happens", &Payload::None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Assertion);
        assert_eq!(err.context("checking").to_string(), "checking: nothing happened");
    }

    #[test]
    fn test_default_registry_is_unambiguous() {
        let registry = default_registry().unwrap();
        registry
            .seal([
                "Kogito operator is deployed",
                "Kogito operator is deployed cluster wide",
                "Infinispan operator is deployed",
                r#"Deploy quarkus runtime "example""#,
                r#"Runtime "example" has 1 pod running within 10 minutes"#,
                "Project kie-asset-library is cloned",
            ])
            .unwrap();
        assert!(registry.len() >= 20);
    }
}
