/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::sync::Arc;

use bitvec::vec::BitVec;
use futures::future::try_join_all;
use ndregion::Region;
use tokio::sync::watch;

use super::Predicate;
use super::Query;
use crate::error::Error;
use crate::error::Result;
use crate::metrics::QUERIES_EVALUATED;
use crate::object::Object;
use crate::object::QueryLease;
use crate::transfer::Status;

/// The predicates of one object, sent to the evaluator in one call.
struct Batch {
    object: Object,
    region: Region,
    predicates: Vec<Predicate>,
}

impl Query {
    /// Start evaluating this query over `region` of every referenced
    /// object (the whole object when `None`). The region is resolved
    /// against each object separately, and every object must select the
    /// same number of elements so that their bitsets line up.
    ///
    /// The evaluator is called once per distinct object with all of
    /// that object's comparisons. Until the returned handle completes,
    /// each referenced object counts the evaluation as outstanding.
    /// Must be called from within a tokio runtime.
    pub fn evaluate(&self, region: Option<&Region>) -> Result<QueryResult> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::Runtime(format!("query evaluation needs a tokio runtime: {}", err)))?;

        let mut batches: Vec<Batch> = Vec::new();
        // For each leaf, left to right: (batch, predicate within batch).
        let mut slots = Vec::new();
        for (object, predicate) in self.comparisons() {
            let index = match batches.iter().position(|batch| batch.object == *object) {
                Some(index) => index,
                None => {
                    batches.push(Batch {
                        object: object.clone(),
                        region: object.absolute_region(region)?,
                        predicates: Vec::new(),
                    });
                    batches.len() - 1
                }
            };
            slots.push((index, batches[index].predicates.len()));
            batches[index].predicates.push(*predicate);
        }

        let len = batches[0].region.num_elements()?;
        for batch in &batches[1..] {
            let other = batch.region.num_elements()?;
            if other != len {
                return Err(Error::validation(format!(
                    "{} of object `{}` selects {} elements, but {} of object `{}` selects {}",
                    batches[0].region,
                    batches[0].object.name(),
                    len,
                    batch.region,
                    batch.object.name(),
                    other
                )));
            }
        }

        let leases = batches
            .iter()
            .map(|batch| batch.object.state().lease_query())
            .collect::<Result<Vec<QueryLease>>>()?;

        let (tx, rx) = watch::channel(None);
        let query = self.clone();
        runtime.spawn(async move {
            let outcome = run(&query, &batches, &slots, len).await;
            match &outcome {
                Ok(outcome) => {
                    QUERIES_EVALUATED.add(1, &[]);
                    tracing::debug!("query `{}` matched {} of {} elements", query, outcome.nhits(), len);
                }
                Err(err) => tracing::debug!("query `{}` failed: {}", query, err),
            }
            // Release the objects before publishing, so that a waiter
            // sees them idle.
            drop(leases);
            // The receiver may be gone; the outcome is then unobserved.
            let _ = tx.send(Some(outcome));
        });

        Ok(QueryResult { rx })
    }
}

async fn run(
    query: &Query,
    batches: &[Batch],
    slots: &[(usize, usize)],
    len: usize,
) -> Result<QueryOutcome> {
    let evaluator = batches[0].object.state().session.backend.evaluator.clone();
    let bitsets = try_join_all(batches.iter().map(|batch| {
        evaluator.evaluate(batch.object.id(), &batch.region, &batch.predicates)
    }))
    .await?;

    for (batch, sets) in batches.iter().zip(&bitsets) {
        if sets.len() != batch.predicates.len() || sets.iter().any(|set| set.len() != len) {
            return Err(Error::Runtime(format!(
                "evaluator returned a malformed result for object `{}`",
                batch.object.name()
            )));
        }
    }

    let mut leaves = slots.iter().map(|(batch, predicate)| &bitsets[*batch][*predicate]);
    let hits = Arc::new(combine(query, &mut leaves)?);
    let selections = batches
        .iter()
        .map(|batch| Selection {
            object: batch.object.clone(),
            region: batch.region.clone(),
            hits: hits.clone(),
        })
        .collect();
    Ok(QueryOutcome { hits, selections })
}

fn combine<'a>(query: &Query, leaves: &mut impl Iterator<Item = &'a BitVec>) -> Result<BitVec> {
    match query {
        Query::Comparison { .. } => leaves
            .next()
            .cloned()
            .ok_or_else(|| Error::Runtime("query has more comparisons than results".to_string())),
        Query::And(lhs, rhs) => {
            let (lhs, rhs) = (combine(lhs, leaves)?, combine(rhs, leaves)?);
            Ok(zip_bits(&lhs, &rhs, |a, b| a && b))
        }
        Query::Or(lhs, rhs) => {
            let (lhs, rhs) = (combine(lhs, leaves)?, combine(rhs, leaves)?);
            Ok(zip_bits(&lhs, &rhs, |a, b| a || b))
        }
    }
}

fn zip_bits(lhs: &BitVec, rhs: &BitVec, op: impl Fn(bool, bool) -> bool) -> BitVec {
    lhs.iter()
        .by_vals()
        .zip(rhs.iter().by_vals())
        .map(|(a, b)| op(a, b))
        .collect()
}

/// A deferred query evaluation, returned by [`Query::evaluate`].
pub struct QueryResult {
    rx: watch::Receiver<Option<Result<QueryOutcome>>>,
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status())
            .finish()
    }
}

impl QueryResult {
    pub fn status(&self) -> Status {
        match &*self.rx.borrow() {
            None => Status::Pending,
            Some(outcome) => Status::of(outcome),
        }
    }

    /// Wait for the evaluation to finish. Repeated calls return the
    /// same outcome.
    pub async fn wait(&self) -> Result<QueryOutcome> {
        let mut rx = self.rx.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Runtime("query evaluation was dropped before completing".to_string()))?;
        match &*outcome {
            Some(outcome) => outcome.clone(),
            None => Err(Error::Runtime("query evaluation produced no outcome".to_string())),
        }
    }

    /// Same as [`QueryResult::wait`].
    pub async fn wait_for_result(&self) -> Result<QueryOutcome> {
        self.wait().await
    }
}

/// The elements matched by a query.
///
/// Hits are indexed by position within the queried region, in
/// row-major order, and are shared by every referenced object.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    hits: Arc<BitVec>,
    selections: Vec<Selection>,
}

impl QueryOutcome {
    pub fn nhits(&self) -> usize {
        self.hits.count_ones()
    }

    pub fn hits(&self) -> &BitVec {
        &self.hits
    }

    /// The matches as seen from one referenced object.
    pub fn selection(&self, object: &Object) -> Option<&Selection> {
        self.selections
            .iter()
            .find(|selection| selection.object == *object)
    }

    /// One selection per referenced object, in [`Query::objects`] order.
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }
}

/// The matching elements of one object.
#[derive(Debug, Clone)]
pub struct Selection {
    object: Object,
    region: Region,
    hits: Arc<BitVec>,
}

impl Selection {
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// The absolute region that was queried.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn nhits(&self) -> usize {
        self.hits.count_ones()
    }

    /// Positions of the matches within the queried region.
    pub fn ordinals(&self) -> Vec<usize> {
        self.hits.iter_ones().collect()
    }

    /// Row-major flat offsets of the matches within the object.
    pub fn indices(&self) -> Result<Vec<usize>> {
        Ok(self
            .region
            .locations(self.object.dims())?
            .enumerate()
            .filter(|(ordinal, _)| self.hits[*ordinal])
            .map(|(_, offset)| offset)
            .collect())
    }

    /// Coordinates of the matches within the object.
    pub fn coordinates(&self) -> Result<Vec<Vec<usize>>> {
        self.hits
            .iter_ones()
            .map(|ordinal| Ok(self.region.coordinates(ordinal)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitvec::vec::BitVec;
    use mockall::predicate::eq;
    use ndregion::region;

    use super::*;
    use crate::Lifetime;
    use crate::ObjectProperties;
    use crate::Session;
    use crate::backend::Capabilities;
    use crate::backend::MockPredicateEvaluator;
    use crate::data::DataType;
    use crate::ids::ObjectId;
    use crate::query::Operator;
    use crate::sim::SimBackend;

    fn bits(pattern: &str) -> BitVec {
        pattern.chars().map(|c| c == '1').collect()
    }

    fn session_with_evaluator(evaluator: MockPredicateEvaluator) -> Session {
        let capabilities = Capabilities {
            evaluator: Arc::new(evaluator),
            ..Capabilities::new(Arc::new(SimBackend::new()))
        };
        Session::with_capabilities(capabilities, Default::default())
    }

    fn create(session: &Session, names: &[&str], dims: &[usize]) -> Vec<Object> {
        let cont = session.create_container("c").unwrap();
        let props = ObjectProperties::new(dims, DataType::Int16).unwrap();
        names
            .iter()
            .map(|name| cont.create_object(name, &props, Lifetime::Transient).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_call_per_object() {
        let mut evaluator = MockPredicateEvaluator::new();
        evaluator
            .expect_evaluate()
            .with(eq(ObjectId(0)), eq(region![0..4].unwrap()), mockall::predicate::always())
            .times(1)
            .returning(|_, _, predicates| {
                assert_eq!(predicates.len(), 2);
                assert_eq!(predicates[0].op, Operator::Gt);
                assert_eq!(predicates[1].op, Operator::Lt);
                Ok(vec![bits("0111"), bits("1100")])
            });
        evaluator
            .expect_evaluate()
            .with(eq(ObjectId(1)), eq(region![0..4].unwrap()), mockall::predicate::always())
            .times(1)
            .returning(|_, _, predicates| {
                assert_eq!(predicates.len(), 1);
                Ok(vec![bits("0001")])
            });

        let session = session_with_evaluator(evaluator);
        let objs = create(&session, &["a", "b"], &[4]);
        let (a, b) = (&objs[0], &objs[1]);

        // (a > 0 & a < 10) | b == 3
        let query = (a.data().gt(0) & a.data().lt(10)) | b.data().eq(3);
        let result = query.evaluate(None).unwrap();
        let outcome = result.wait().await.unwrap();
        assert_eq!(outcome.hits(), &bits("0101"));
        assert_eq!(outcome.nhits(), 2);
        assert_eq!(result.status(), Status::Succeeded);
        assert_eq!(outcome.selections().len(), 2);
        assert_eq!(outcome.selection(b).unwrap().ordinals(), vec![1, 3]);

        // Completed: waiting again does not evaluate again.
        assert_eq!(result.wait_for_result().await.unwrap().hits(), &bits("0101"));
        assert_eq!(a.outstanding(), 0);
        assert_eq!(b.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_selection_positions() {
        let mut evaluator = MockPredicateEvaluator::new();
        evaluator
            .expect_evaluate()
            .times(1)
            .returning(|_, region, _| {
                assert_eq!(region, &region![1..3, 1..3].unwrap());
                Ok(vec![bits("1001")])
            });

        let session = session_with_evaluator(evaluator);
        let objs = create(&session, &["grid"], &[4, 4]);
        let outcome = objs[0]
            .data()
            .ge(1)
            .evaluate(Some(&region![1..3, 1..3].unwrap()))
            .unwrap()
            .wait()
            .await
            .unwrap();
        let selection = outcome.selection(&objs[0]).unwrap();
        assert_eq!(selection.nhits(), 2);
        assert_eq!(selection.indices().unwrap(), vec![5, 10]);
        assert_eq!(selection.coordinates().unwrap(), vec![vec![1, 1], vec![2, 2]]);
    }

    #[tokio::test]
    async fn test_evaluator_failure() {
        let mut evaluator = MockPredicateEvaluator::new();
        evaluator
            .expect_evaluate()
            .times(1)
            .returning(|_, _, _| Err(Error::Runtime("evaluator down".to_string())));

        let session = session_with_evaluator(evaluator);
        let objs = create(&session, &["a"], &[4]);
        let result = objs[0].data().eq(1).evaluate(None).unwrap();
        let err = result.wait().await.unwrap_err();
        assert_eq!(err, Error::Runtime("evaluator down".to_string()));
        assert_eq!(result.status(), Status::Failed);
        assert_eq!(objs[0].outstanding(), 0);
    }

    #[tokio::test]
    async fn test_malformed_evaluator_result() {
        let mut evaluator = MockPredicateEvaluator::new();
        evaluator
            .expect_evaluate()
            .times(1)
            .returning(|_, _, _| Ok(vec![bits("01")]));

        let session = session_with_evaluator(evaluator);
        let objs = create(&session, &["a"], &[4]);
        let result = objs[0].data().eq(1).evaluate(None).unwrap();
        assert!(matches!(result.wait().await, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_mismatched_regions() {
        let session = Session::simulated();
        let cont = session.create_container("c").unwrap();
        let small = ObjectProperties::new([4], DataType::Int16).unwrap();
        let large = ObjectProperties::new([8], DataType::Int16).unwrap();
        let a = cont.create_object("a", &small, Lifetime::Transient).unwrap();
        let b = cont.create_object("b", &large, Lifetime::Transient).unwrap();

        let query = a.data().gt(1) & b.data().gt(1);
        assert!(matches!(query.evaluate(None), Err(Error::Validation(_))));
        assert_eq!(a.outstanding(), 0);

        // The same sized slice of each lines up.
        let outcome = query
            .evaluate(Some(&region![0..2].unwrap()))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(outcome.nhits(), 0);
    }

    #[test]
    fn test_no_runtime() {
        let session = Session::simulated();
        let objs = create(&session, &["a"], &[4]);
        assert!(matches!(
            objs[0].data().gt(1).evaluate(None),
            Err(Error::Runtime(_))
        ));
        assert_eq!(objs[0].outstanding(), 0);
    }
}
