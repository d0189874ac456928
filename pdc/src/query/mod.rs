/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Lazily evaluated predicates over object data.
//!
//! A [`Query`] is a tree whose leaves compare one object's elements
//! against a scalar and whose interior nodes are conjunctions and
//! disjunctions. Trees are only built here; nothing touches the backend
//! until [`Query::evaluate`] is called.
//!
//! ```
//! use pdc::DataType;
//! use pdc::Lifetime;
//! use pdc::ObjectProperties;
//! use pdc::Session;
//!
//! let session = Session::simulated();
//! let cont = session.create_container("c").unwrap();
//! let props = ObjectProperties::new([10], DataType::Int16).unwrap();
//! let a = cont.create_object("a", &props, Lifetime::Transient).unwrap();
//! let b = cont.create_object("b", &props, Lifetime::Transient).unwrap();
//!
//! let query = (a.data().gt(45) & b.data().lt(45)) | a.data().eq(0);
//! assert_eq!(query.to_string(), "((a > 45 & b < 45) | a == 0)");
//! assert_eq!(query.objects().len(), 2);
//! ```
//!
//! `&` and `|` build exactly the tree that the Rust expression parses
//! to: `&` binds tighter than `|`, and no reassociation happens
//! afterwards. Group explicitly when in doubt.

mod eval;

use std::cmp::Ordering;
use std::fmt;
use std::ops::BitAnd;
use std::ops::BitOr;

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

pub use self::eval::QueryOutcome;
pub use self::eval::QueryResult;
pub use self::eval::Selection;
use crate::object::Object;

/// A relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

impl Operator {
    /// Whether `lhs op rhs` holds, given `lhs.partial_cmp(rhs)`.
    /// Unordered operands (NaN) are only ever unequal.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match self {
            Operator::Lt => ordering == Some(Ordering::Less),
            Operator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::Eq => ordering == Some(Ordering::Equal),
            Operator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Gt => ordering == Some(Ordering::Greater),
            Operator::Ne => ordering != Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Ne => "!=",
        };
        f.write_str(symbol)
    }
}

/// A numeric literal, or a decoded element of an object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    /// Numeric comparison across representations. Integers compare
    /// exactly; anything involving a float compares as `f64`.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (*self, *other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(&b)),
            (Scalar::UInt(a), Scalar::UInt(b)) => Some(a.cmp(&b)),
            (Scalar::Int(a), Scalar::UInt(b)) => Some(i128::from(a).cmp(&i128::from(b))),
            (Scalar::UInt(a), Scalar::Int(b)) => Some(i128::from(a).cmp(&i128::from(b))),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! scalar_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::$variant(value.into())
                }
            }
        )+
    };
}

scalar_from!(Int: i8, i16, i32, i64);
scalar_from!(UInt: u8, u16, u32, u64);
scalar_from!(Float: f32, f64);

/// One comparison against a literal: `element op literal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub op: Operator,
    pub literal: Scalar,
}

impl Predicate {
    pub fn matches(&self, element: &Scalar) -> bool {
        self.op.holds(element.compare(&self.literal))
    }
}

/// This trait defines the abstract syntax of queries, in the
/// [tagless-final](https://okmij.org/ftp/tagless-final/index.html)
/// style. [`Query`] is the tree representation; pretty printing is
/// another interpretation.
pub trait QuerySYM {
    /// Compare every element of `object` against `literal`.
    fn compare(object: Object, op: Operator, literal: Scalar) -> Self;

    /// Elements matching both sides.
    fn and(lhs: Self, rhs: Self) -> Self;

    /// Elements matching either side.
    fn or(lhs: Self, rhs: Self) -> Self;
}

/// `QuerySYM` constructors specialized to [`Query`].
pub mod dsl {
    use super::Operator;
    use super::Query;
    use super::QuerySYM;
    use super::Scalar;
    use crate::object::Object;

    pub fn compare(object: Object, op: Operator, literal: impl Into<Scalar>) -> Query {
        QuerySYM::compare(object, op, literal.into())
    }

    pub fn and(lhs: Query, rhs: Query) -> Query {
        QuerySYM::and(lhs, rhs)
    }

    pub fn or(lhs: Query, rhs: Query) -> Query {
        QuerySYM::or(lhs, rhs)
    }
}

/// A predicate tree over object data.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Comparison { object: Object, predicate: Predicate },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
}

impl QuerySYM for Query {
    fn compare(object: Object, op: Operator, literal: Scalar) -> Self {
        Query::Comparison {
            object,
            predicate: Predicate { op, literal },
        }
    }

    fn and(lhs: Self, rhs: Self) -> Self {
        Query::And(Box::new(lhs), Box::new(rhs))
    }

    fn or(lhs: Self, rhs: Self) -> Self {
        Query::Or(Box::new(lhs), Box::new(rhs))
    }
}

struct QueryPretty(String);

impl QuerySYM for QueryPretty {
    fn compare(object: Object, op: Operator, literal: Scalar) -> Self {
        QueryPretty(format!("{} {} {}", object.name(), op, literal))
    }

    fn and(lhs: Self, rhs: Self) -> Self {
        QueryPretty(format!("({} & {})", lhs.0, rhs.0))
    }

    fn or(lhs: Self, rhs: Self) -> Self {
        QueryPretty(format!("({} | {})", lhs.0, rhs.0))
    }
}

impl Query {
    /// Interpret this tree in another representation.
    pub fn fold<S: QuerySYM>(&self) -> S {
        match self {
            Query::Comparison { object, predicate } => {
                S::compare(object.clone(), predicate.op, predicate.literal)
            }
            Query::And(lhs, rhs) => S::and(lhs.fold(), rhs.fold()),
            Query::Or(lhs, rhs) => S::or(lhs.fold(), rhs.fold()),
        }
    }

    /// The distinct objects referenced by this tree, in order of first
    /// appearance from left to right.
    pub fn objects(&self) -> Vec<Object> {
        self.comparisons()
            .into_iter()
            .map(|(object, _)| object)
            .unique_by(|object| object.id())
            .cloned()
            .collect()
    }

    /// The leaves of this tree, left to right.
    pub fn comparisons(&self) -> Vec<(&Object, &Predicate)> {
        let mut leaves = Vec::new();
        self.collect_comparisons(&mut leaves);
        leaves
    }

    fn collect_comparisons<'a>(&'a self, leaves: &mut Vec<(&'a Object, &'a Predicate)>) {
        match self {
            Query::Comparison { object, predicate } => leaves.push((object, predicate)),
            Query::And(lhs, rhs) | Query::Or(lhs, rhs) => {
                lhs.collect_comparisons(leaves);
                rhs.collect_comparisons(leaves);
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fold::<QueryPretty>().0)
    }
}

impl BitAnd for Query {
    type Output = Query;

    fn bitand(self, rhs: Query) -> Query {
        dsl::and(self, rhs)
    }
}

impl BitOr for Query {
    type Output = Query;

    fn bitor(self, rhs: Query) -> Query {
        dsl::or(self, rhs)
    }
}

/// Builds comparisons over one object's data. Obtained from
/// [`Object::data`].
#[derive(Debug, Clone)]
pub struct ObjectData {
    object: Object,
}

impl ObjectData {
    pub(crate) fn new(object: Object) -> Self {
        Self { object }
    }

    pub fn compare(&self, op: Operator, literal: impl Into<Scalar>) -> Query {
        dsl::compare(self.object.clone(), op, literal)
    }

    pub fn lt(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Lt, literal)
    }

    pub fn le(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Le, literal)
    }

    pub fn eq(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Eq, literal)
    }

    pub fn ge(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Ge, literal)
    }

    pub fn gt(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Gt, literal)
    }

    pub fn ne(&self, literal: impl Into<Scalar>) -> Query {
        self.compare(Operator::Ne, literal)
    }
}
