//! Inline transforms: declarative operators that compute a data node's
//! value from other data nodes without invoking a module.
//!
//! A data node carrying one of these is *derived*. The scheduler evaluates
//! derived nodes eagerly as soon as their inputs resolve, so chains of
//! transforms collapse inside the earliest batch where all roots are known.
//!
//! Map/Filter/All/Any bodies and Match arms are host callables. They do not
//! survive serialization: a deserialized graph carries an [`InlineTransform::Opaque`]
//! marker in their place, which the runtime rejects if asked to execute.

mod eval;

pub use eval::evaluate;

use crate::value::{CType, CValue, RawValue};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Element-wise transformation callable
pub type MapFn = Arc<dyn Fn(&RawValue) -> TransformResult<RawValue> + Send + Sync>;

/// Element predicate callable
pub type PredicateFn = Arc<dyn Fn(&RawValue) -> TransformResult<bool> + Send + Sync>;

/// Match-arm pattern test
pub type MatcherFn = Arc<dyn Fn(&RawValue) -> bool + Send + Sync>;

/// Match-arm body
pub type BodyFn = Arc<dyn Fn(&RawValue) -> TransformResult<RawValue> + Send + Sync>;

/// Errors raised while evaluating an inline transform
#[derive(Error, Debug)]
pub enum TransformError {
    /// Declared input absent from the evaluation environment
    #[error("{transform}: missing input '{name}'")]
    MissingInput { transform: String, name: String },

    /// Input present but with the wrong shape
    #[error("{transform}: input '{name}' has wrong shape: expected {expected}, got {got}")]
    WrongInputShape {
        transform: String,
        name: String,
        expected: String,
        got: String,
    },

    /// Closure-bearing transform deserialized without its closure
    #[error("{transform} is not executable: closure missing after deserialization")]
    NotExecutable { transform: String },

    /// Operator-specific failure
    #[error("{transform}: {message}")]
    Failed { transform: String, message: String },
}

/// Result type for transform evaluation
pub type TransformResult<T> = Result<T, TransformError>;

/// The inline-transform operator sum.
#[derive(Clone)]
pub enum InlineTransform {
    /// Constant value; takes no inputs
    Literal(CValue),
    /// `operand: Boolean` negated
    Not,
    /// `left, right: Boolean` conjunction (both inputs are prior graph
    /// nodes and therefore already evaluated)
    And,
    /// `left, right: Boolean` disjunction
    Or,
    /// `cond: Boolean, thenBr, elseBr: T`; both branches are materialized
    Conditional,
    /// `cond: Boolean, expr: T` to `Optional<T>`
    Guard,
    /// `left: Optional<T>, right: T`; inner of `left` when present
    Coalesce,
    /// `source: Product` field projection
    FieldAccess { field: String, source_type: CType },
    /// Inputs named per `field_order` assembled into a product
    RecordBuild { field_order: Vec<String> },
    /// `left, right: Product` combined; right fields win on collision
    Merge { left_type: CType, right_type: CType },
    /// `source: Product` restricted to `keep` fields
    Project { keep: Vec<String>, source_type: CType },
    /// Inputs `elem0..elem{count-1}` into a list
    ListLiteral { count: usize },
    /// `source: List` mapped element-wise
    Map { f: MapFn },
    /// `source: List` filtered
    Filter { predicate: PredicateFn },
    /// `source: List` to Boolean: every element satisfies the predicate
    All { predicate: PredicateFn },
    /// `source: List` to Boolean: some element satisfies the predicate
    Any { predicate: PredicateFn },
    /// Inputs `expr0..expr{n-1}` interleaved with the `n + 1` literal parts
    StringInterpolation { parts: Vec<String> },
    /// `scrutinee: scrutinee_type`; first matching arm's body wins
    Match {
        matchers: Vec<MatcherFn>,
        bodies: Vec<BodyFn>,
        scrutinee_type: CType,
    },
    /// Deserialized closure-bearing transform; present but non-executable
    Opaque { transform_type: String },
}

impl InlineTransform {
    /// Wire/serialization name of this transform
    pub fn transform_type(&self) -> &str {
        match self {
            InlineTransform::Literal(_) => "LiteralTransform",
            InlineTransform::Not => "NotTransform",
            InlineTransform::And => "AndTransform",
            InlineTransform::Or => "OrTransform",
            InlineTransform::Conditional => "ConditionalTransform",
            InlineTransform::Guard => "GuardTransform",
            InlineTransform::Coalesce => "CoalesceTransform",
            InlineTransform::FieldAccess { .. } => "FieldAccessTransform",
            InlineTransform::RecordBuild { .. } => "RecordBuildTransform",
            InlineTransform::Merge { .. } => "MergeTransform",
            InlineTransform::Project { .. } => "ProjectTransform",
            InlineTransform::ListLiteral { .. } => "ListLiteralTransform",
            InlineTransform::Map { .. } => "MapTransform",
            InlineTransform::Filter { .. } => "FilterTransform",
            InlineTransform::All { .. } => "AllTransform",
            InlineTransform::Any { .. } => "AnyTransform",
            InlineTransform::StringInterpolation { .. } => "StringInterpolationTransform",
            InlineTransform::Match { .. } => "MatchTransform",
            InlineTransform::Opaque { transform_type } => transform_type,
        }
    }

    /// True when this transform can actually run (its closures, if any,
    /// are present)
    pub fn is_executable(&self) -> bool {
        !matches!(self, InlineTransform::Opaque { .. })
    }

    /// True for operators that carry host callables and therefore cannot
    /// round-trip through serialization
    pub fn carries_closures(&self) -> bool {
        matches!(
            self,
            InlineTransform::Map { .. }
                | InlineTransform::Filter { .. }
                | InlineTransform::All { .. }
                | InlineTransform::Any { .. }
                | InlineTransform::Match { .. }
        )
    }
}

impl fmt::Debug for InlineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineTransform::Literal(value) => {
                f.debug_tuple("Literal").field(value).finish()
            }
            InlineTransform::FieldAccess { field, source_type } => f
                .debug_struct("FieldAccess")
                .field("field", field)
                .field("source_type", source_type)
                .finish(),
            InlineTransform::RecordBuild { field_order } => f
                .debug_struct("RecordBuild")
                .field("field_order", field_order)
                .finish(),
            InlineTransform::Project { keep, .. } => {
                f.debug_struct("Project").field("keep", keep).finish()
            }
            InlineTransform::ListLiteral { count } => f
                .debug_struct("ListLiteral")
                .field("count", count)
                .finish(),
            InlineTransform::StringInterpolation { parts } => f
                .debug_struct("StringInterpolation")
                .field("parts", parts)
                .finish(),
            other => write!(f, "{}", other.transform_type()),
        }
    }
}
