//!Processes one cross-sectional bucket: precedence ordering, then a greedy
//!forward pass that admits candidates while the retain predicate holds.

use crate::collect::classify::Precedence;
use crate::collect::CollectError;
use crate::eval::{EvalContext, Evaluator, Row};
use crate::types::{Key, Point};

///Sort the bucket, greedily accumulate accepted points into a new row,
///enrich accepted points with the declared output columns and append the row
///to the result.
///
///Rejection only discards the candidate under trial; points accepted earlier
///in the same bucket are never revisited.
pub fn process(
    key: Key,
    points: Vec<Point>,
    precedence: &[Precedence],
    retain: Option<&Evaluator>,
    columns: &[(String, Evaluator)],
    result: &mut Vec<Row>,
) -> Result<(), CollectError> {
    let mut ordered = points;
    //passes run from the last directive to the first so the first directive
    //ends up dominant; each pass is a stable sort, with desc realized by a
    //reversed comparator so equal-key runs keep the previous pass's order
    for directive in precedence.iter().rev() {
        let Some(by) = &directive.by else { continue };
        if directive.desc {
            ordered.sort_by(|a, b| b.get(by).cmp_order(&a.get(by)));
        } else {
            ordered.sort_by(|a, b| a.get(by).cmp_order(&b.get(by)));
        }
    }

    let mut row = Row::new(key);
    for point in ordered {
        let id = point.security_id();
        row.insert(id.clone(), point);

        let keep = match retain {
            None => true,
            Some(retain) => {
                let ctx = EvalContext {
                    completed: result.as_slice(),
                    row: &row,
                    current: row.get(&id).unwrap(),
                };
                retain.call(&ctx)?.is_truthy()
            }
        };

        if keep {
            let mut computed = Vec::with_capacity(columns.len());
            {
                let ctx = EvalContext {
                    completed: result.as_slice(),
                    row: &row,
                    current: row.get(&id).unwrap(),
                };
                for (name, evaluator) in columns {
                    computed.push((name.clone(), evaluator.call(&ctx)?));
                }
            }
            let point = row.get_mut(&id).unwrap();
            for (name, value) in computed {
                point.set(name, value);
            }
        } else {
            row.remove(&id);
        }
    }
    result.push(row);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::process;
    use crate::collect::classify::Precedence;
    use crate::eval::compile_local;
    use crate::expr::parse;
    use crate::types::{Key, Point, Value};

    fn point(symbol: &str, volume: f64, rank: f64) -> Point {
        Point::new(symbol, "X", 86_400)
            .with("volume", volume)
            .with("rank", rank)
    }

    fn desc(by: &str) -> Precedence {
        Precedence {
            by: Some(by.into()),
            desc: true,
        }
    }

    fn asc(by: &str) -> Precedence {
        Precedence {
            by: Some(by.into()),
            desc: false,
        }
    }

    #[test]
    fn test_that_without_retain_every_point_is_kept() {
        let mut result = Vec::new();
        let bucket = vec![point("AAA", 100.0, 1.0), point("BBB", 200.0, 2.0)];
        process(Key::truncate(86_400), bucket, &[], None, &[], &mut result).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 2);
    }

    #[test]
    fn test_that_quota_retain_keeps_the_highest_precedence_point() {
        let retain = compile_local(&parse("COUNT() <= 1").unwrap()).unwrap();
        let mut result = Vec::new();
        let bucket = vec![
            point("AAA", 100.0, 1.0),
            point("BBB", 300.0, 2.0),
            point("CCC", 200.0, 3.0),
        ];
        process(
            Key::truncate(86_400),
            bucket,
            &[desc("volume")],
            Some(&retain),
            &[],
            &mut result,
        )
        .unwrap();

        assert_eq!(result[0].len(), 1);
        assert_eq!(
            result[0].get("BBB.X").unwrap().get("volume"),
            Value::Num(300.0)
        );
    }

    #[test]
    fn test_that_top_n_retain_keeps_lowest_ranks_in_order() {
        let retain = compile_local(&parse("COUNT() <= 2").unwrap()).unwrap();
        let mut result = Vec::new();
        let bucket = vec![
            point("AAA", 100.0, 3.0),
            point("BBB", 300.0, 1.0),
            point("CCC", 200.0, 2.0),
        ];
        process(
            Key::truncate(86_400),
            bucket,
            &[asc("rank")],
            Some(&retain),
            &[],
            &mut result,
        )
        .unwrap();

        let kept: Vec<&str> = result[0].iter().map(|(id, _)| id).collect();
        assert_eq!(kept, vec!["BBB.X", "CCC.X"]);
    }

    #[test]
    fn test_that_rejection_does_not_backtrack_accepted_points() {
        //volume ascending, quota of one: AAA is accepted first and BBB is
        //rejected, even though BBB alone would also satisfy the predicate
        let retain = compile_local(&parse("COUNT() <= 1").unwrap()).unwrap();
        let mut result = Vec::new();
        let bucket = vec![point("AAA", 100.0, 1.0), point("BBB", 300.0, 2.0)];
        process(
            Key::truncate(86_400),
            bucket,
            &[asc("volume")],
            Some(&retain),
            &[],
            &mut result,
        )
        .unwrap();

        assert_eq!(result[0].len(), 1);
        assert!(result[0].get("AAA.X").is_some());
    }

    #[test]
    fn test_that_two_directive_precedence_orders_primary_then_secondary() {
        let mut result = Vec::new();
        let bucket = vec![
            point("AAA", 200.0, 2.0),
            point("BBB", 100.0, 1.0),
            point("CCC", 200.0, 1.0),
        ];
        //primary: volume descending; secondary: rank ascending breaks the tie
        process(
            Key::truncate(86_400),
            bucket,
            &[desc("volume"), asc("rank")],
            None,
            &[],
            &mut result,
        )
        .unwrap();

        let order: Vec<&str> = result[0].iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["CCC.X", "AAA.X", "BBB.X"]);
    }

    #[test]
    fn test_that_descending_ties_keep_their_incoming_order() {
        let mut result = Vec::new();
        let bucket = vec![
            point("AAA", 200.0, 1.0),
            point("BBB", 200.0, 2.0),
            point("CCC", 100.0, 3.0),
        ];
        process(
            Key::truncate(86_400),
            bucket,
            &[desc("volume")],
            None,
            &[],
            &mut result,
        )
        .unwrap();

        let order: Vec<&str> = result[0].iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["AAA.X", "BBB.X", "CCC.X"]);
    }

    #[test]
    fn test_that_accepted_points_are_enriched_with_output_columns() {
        let columns = vec![(
            "double".to_string(),
            compile_local(&parse("volume * 2").unwrap()).unwrap(),
        )];
        let mut result = Vec::new();
        let bucket = vec![point("AAA", 100.0, 1.0)];
        process(Key::truncate(86_400), bucket, &[], None, &columns, &mut result).unwrap();

        assert_eq!(
            result[0].get("AAA.X").unwrap().get("double"),
            Value::Num(200.0)
        );
    }
}
