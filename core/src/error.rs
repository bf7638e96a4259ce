//! Error types for the core schema and expression pipeline.
//!
//! Provides a unified error type covering expression parsing, schema
//! construction, and structure building. Every failure mode carries the
//! offending type or member name so callers can report it without
//! re-deriving context.

use thiserror::Error;

/// Errors that can occur while building schemas, parsing expressions,
/// or flattening structures.
#[derive(Debug, Error)]
pub enum StruktError {
    /// JSON serialization or deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A predicate contains a method call that is neither constant-foldable
    /// nor part of the recognized query vocabulary.
    #[error("unsupported method call '{0}' in predicate")]
    UnsupportedMethodCall(String),

    /// Byte-array members cannot be filtered or sorted.
    #[error("member '{0}' is a byte array and cannot be used in a predicate or sorting")]
    BytesMemberNotSupported(String),

    /// A predicate referenced a member without comparing it to anything.
    #[error("predicate references member '{0}' without a comparison")]
    MemberWithoutComparison(String),

    /// A predicate contains no member reference at all.
    #[error("predicate contains no member reference")]
    NoMemberReference,

    /// The referenced member path is not declared on the schema.
    #[error("unknown member path '{path}' on structure '{schema}'")]
    UnknownMember {
        /// Schema name.
        schema: String,
        /// Offending member path.
        path: String,
    },

    /// The operator is not supported inside an enumerable containment
    /// predicate, where matching happens against the flattened value string.
    #[error("operator '{op}' is not supported inside an enumerable predicate over '{path}'")]
    NotSupportedInEnumerable {
        /// Enumerable member path.
        path: String,
        /// Rejected operator rendering.
        op: String,
    },

    /// An enumerable containment predicate targeted a non-enumerable member.
    #[error("member '{0}' is not enumerable and cannot be used with any()")]
    NotEnumerable(String),

    /// A comparison had member references on both sides.
    #[error("comparison of member '{0}' against member '{1}' is not supported")]
    MemberToMemberComparison(String, String),

    /// A null comparison used an ordering operator instead of equality.
    #[error("operator '{0}' cannot be used in a null comparison; only equality is supported")]
    InvalidNullComparison(String),

    /// Schema declared without an identity member.
    #[error("structure '{0}' declares no id member")]
    MissingIdMember(String),

    /// Schema declared without any indexable members.
    #[error("structure '{0}' declares no indexable members")]
    MissingIndexes(String),

    /// The identity member of a document had the wrong type for the schema.
    #[error("id member '{member}' on structure '{schema}' does not match the declared id type")]
    WrongIdType {
        /// Schema name.
        schema: String,
        /// Identity member name.
        member: String,
    },

    /// A unique-designated member observed a null or empty value.
    #[error("unique member '{path}' on structure '{schema}' is null or empty")]
    UniqueValueIsNull {
        /// Schema name.
        schema: String,
        /// Offending member path.
        path: String,
    },

    /// A document serialized to something other than a JSON object.
    #[error("document for structure '{0}' is not a JSON object")]
    NotAnObject(String),

    /// The integer id pool was exhausted before all items received an id.
    #[error("id pool exhausted while assigning identities for structure '{0}'")]
    IdPoolExhausted(String),

    /// An include referenced a member that is not an id reference.
    #[error("include reference '{path}' on structure '{schema}' is not an id-typed member")]
    InvalidIncludeReference {
        /// Parent schema name.
        schema: String,
        /// Offending reference path.
        path: String,
    },
}

/// Convenience alias for results with [`StruktError`].
pub type Result<T> = std::result::Result<T, StruktError>;
