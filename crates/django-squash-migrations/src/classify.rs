//! Finding the operations that cannot be derived from model state.
//!
//! Raw Python and raw SQL survive a squash because the diff engine can never
//! regenerate them. [`all_custom_operations`] walks an operation list,
//! descending into [`SeparateDatabaseAndState`](crate::operations::SeparateDatabaseAndState)
//! composites, and yields every such operation in order.

use std::slice;

use crate::operations::Operation;

#[derive(Clone)]
struct Frame<'a> {
    ops: slice::Iter<'a, Operation>,
    database: bool,
}

/// Iterator returned by [`all_custom_operations`].
#[derive(Clone)]
pub struct CustomOperations<'a> {
    stack: Vec<Frame<'a>>,
}

/// Yields every non-elidable `RunPython` and `RunSql` in `operations`.
///
/// Composites contribute their state operations first, then their database
/// operations. Elidable operations are skipped.
pub fn all_custom_operations(operations: &[Operation]) -> CustomOperations<'_> {
    CustomOperations {
        stack: vec![Frame {
            ops: operations.iter(),
            database: false,
        }],
    }
}

impl<'a> Iterator for CustomOperations<'a> {
    type Item = &'a Operation;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(op) = frame.ops.next() else {
                self.stack.pop();
                continue;
            };
            let database = frame.database;

            match op {
                Operation::SeparateDatabaseAndState(composite) => {
                    // The top of the stack runs first.
                    self.stack.push(Frame {
                        ops: composite.database_operations.iter(),
                        database: true,
                    });
                    self.stack.push(Frame {
                        ops: composite.state_operations.iter(),
                        database,
                    });
                }
                Operation::RunPython(_) | Operation::RunSql(_) if !op.elidable() => {
                    if database {
                        tracing::warn!(
                            operation = %op.describe(),
                            "custom operation found inside database_operations; \
                             it is kept but should be reviewed"
                        );
                    }
                    return Some(op);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodetect::ModelOptions;
    use crate::operations::{
        CreateModel, FunctionRef, PythonCallable, RunPython, RunSql, SeparateDatabaseAndState,
    };

    fn run_python(name: &str) -> Operation {
        RunPython::new(PythonCallable::Function(FunctionRef::in_module(
            "blog.migrations.0002_data",
            name,
        )))
        .into()
    }

    fn create(name: &str) -> Operation {
        CreateModel {
            name: name.into(),
            fields: vec![],
            options: ModelOptions::default(),
        }
        .into()
    }

    #[test]
    fn test_flat_list() {
        let ops = vec![create("post"), run_python("a"), RunSql::new("SELECT 1").into()];
        let found: Vec<_> = all_custom_operations(&ops).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], &ops[1]);
        assert_eq!(found[1], &ops[2]);
    }

    #[test]
    fn test_empty_and_schema_only() {
        assert_eq!(all_custom_operations(&[]).count(), 0);
        assert_eq!(all_custom_operations(&[create("post")]).count(), 0);
    }

    #[test]
    fn test_elidable_skipped() {
        let elidable: Operation = RunSql::new("SELECT 1").elidable().into();
        let ops = vec![elidable, run_python("kept")];
        let found: Vec<_> = all_custom_operations(&ops).collect();
        assert_eq!(found, vec![&ops[1]]);
    }

    #[test]
    fn test_composite_state_before_database() {
        let inner = SeparateDatabaseAndState {
            state_operations: vec![run_python("state_fn")],
            database_operations: vec![RunSql::new("UPDATE x").into()],
        };
        let ops = vec![
            run_python("before"),
            inner.clone().into(),
            run_python("after"),
        ];
        let found: Vec<_> = all_custom_operations(&ops).collect();
        assert_eq!(
            found,
            vec![
                &ops[0],
                &inner.state_operations[0],
                &inner.database_operations[0],
                &ops[2],
            ]
        );
    }

    #[test]
    fn test_nested_composites() {
        let nested = SeparateDatabaseAndState {
            state_operations: vec![SeparateDatabaseAndState {
                state_operations: vec![run_python("deep")],
                database_operations: vec![],
            }
            .into()],
            database_operations: vec![],
        };
        let ops = vec![nested.into()];
        assert_eq!(all_custom_operations(&ops).count(), 1);
    }

    #[test]
    fn test_iterator_clone_is_independent() {
        let ops = vec![run_python("a"), run_python("b")];
        let mut iter = all_custom_operations(&ops);
        let copy = iter.clone();
        iter.next();
        assert_eq!(copy.count(), 2);
        assert_eq!(iter.count(), 1);
    }
}
