//! Multi-source comparisons: the all-match shortcut and the full pairwise
//! grouping with its local union-find.

use std::collections::{BTreeMap, BTreeSet};

use crate::cancel::CancelToken;
use crate::cmp::compare_sources;
use crate::pool;
use crate::types::{CompareOptions, CompareResult, Result, SourceSpec};

/// True iff every source is byte-identical to the first. First inequality
/// cancels the remaining work.
pub(crate) fn compare_all_impl(sources: &[SourceSpec], opts: &CompareOptions) -> Result<bool> {
    if sources.len() < 2 {
        return Ok(true);
    }
    let token = CancelToken::for_options(opts);
    let reference = &sources[0];
    let tasks: Vec<&SourceSpec> = sources[1..].iter().collect();
    pool::all_match(tasks, opts.max_workers, &token, |other| {
        compare_sources(reference, other, opts, &token)
    })
}

/// All N·(N-1)/2 pairs plus the equivalence classes observed equality
/// induces. The union-find is deliberately local to this entry point.
pub(crate) fn compare_many_impl(
    sources: &[SourceSpec],
    opts: &CompareOptions,
) -> Result<CompareResult> {
    let names: Vec<String> = sources.iter().map(|s| s.name()).collect();
    let n = sources.len();
    if n < 2 {
        return Ok(CompareResult {
            all_equal: true,
            groups: vec![names.into_iter().collect()],
            diff: BTreeMap::new(),
        });
    }

    let token = CancelToken::for_options(opts);
    let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }

    let results = pool::collect_all(pairs, opts.max_workers, &token, |(i, j)| {
        compare_sources(&sources[i], &sources[j], opts, &token).map(|eq| (i, j, eq))
    })?;

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut parent: Vec<usize> = (0..n).collect();
    let mut diff = BTreeMap::new();
    let mut all_equal = true;
    for (i, j, eq) in results {
        diff.insert((names[i].clone(), names[j].clone()), eq);
        if eq {
            let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
            if ri != rj {
                parent[ri] = rj;
            }
        } else {
            all_equal = false;
        }
    }

    // Group by representative, in first-seen source order.
    let mut by_root: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        by_root.entry(root).or_default().insert(names[i].clone());
    }

    Ok(CompareResult {
        all_equal,
        groups: by_root.into_values().collect(),
        diff,
    })
}
