//! Loop blocking for cache locality
//!
//! Rewrites the outer two levels of a perfectly nested rectangular loop nest
//! into tiles of `block_factor` iterations:
//!
//! ```text
//! parallel for __y_tile in 0..n0 step bf
//!   for __x_tile in 0..n1 step bf
//!     for y in __y_tile..min(n0, __y_tile + bf)
//!       for x in __x_tile..min(n1, __x_tile + bf)
//!         <original body>
//! ```
//!
//! Each of the two levels is blocked on its own: a level whose extent is
//! below the block factor keeps its original bounds and stays among the
//! element loops, under the tiling loops of the levels that were blocked.
//!
//! Every index is still visited exactly once; only the traversal order
//! changes. Tiles write disjoint output elements, so the outermost tiling
//! loop carries the parallel marker.

use crate::ir::{BinOp, Expr, Function, Loop, Stmt};

/// Default tile edge, in iterations
pub const DEFAULT_BLOCK_FACTOR: usize = 32;

/// Name of the tiling loop introduced for `var`
///
/// Source identifiers may not start with `__`, so this never collides.
pub fn tile_var(var: &str) -> String {
    format!("__{}_tile", var)
}

/// Loop blocking pass
#[derive(Debug, Clone, Copy)]
pub struct LoopBlocking {
    block_factor: usize,
}

impl LoopBlocking {
    pub fn new(block_factor: usize) -> Self {
        Self {
            block_factor: block_factor.max(1),
        }
    }

    pub fn block_factor(&self) -> usize {
        self.block_factor
    }

    /// Block every top-level loop nest that qualifies
    pub fn apply(&self, function: Function) -> Function {
        Function {
            body: function
                .body
                .into_iter()
                .flat_map(|stmt| match stmt {
                    Stmt::Loop(outer) => self.block_nest(outer),
                    other => vec![other],
                })
                .collect(),
            ..function
        }
    }

    /// Whether at least one of the outer two levels of `outer` would be blocked
    ///
    /// Only perfect nests of two or more levels qualify.
    pub fn is_blockable(&self, outer: &Loop) -> bool {
        let inner = match outer.body.as_slice() {
            [Stmt::Loop(inner)] => inner,
            _ => return false,
        };
        is_plain(outer) && is_plain(inner) && (self.is_wide(outer) || self.is_wide(inner))
    }

    fn is_wide(&self, l: &Loop) -> bool {
        l.constant_extent()
            .map_or(false, |n| n >= self.block_factor as i64)
    }

    fn block_nest(&self, outer: Loop) -> Vec<Stmt> {
        if !self.is_blockable(&outer) {
            return vec![Stmt::Loop(outer)];
        }

        let bf = self.block_factor as i64;
        let (levels, body) = split_nest(outer);
        let blocked: Vec<&str> = levels
            .iter()
            .filter(|l| self.is_wide(l))
            .map(|l| l.var.as_str())
            .collect();
        log::debug!("blocking loops {:?} with factor {}", blocked, bf);

        // element loops, innermost first
        let mut nest = body;
        let mut tiles = Vec::new();
        for level in levels.into_iter().rev() {
            if self.is_wide(&level) {
                let tile = tile_var(&level.var);
                tiles.push(Loop {
                    var: tile.clone(),
                    start: level.start.clone(),
                    end: level.end.clone(),
                    step: bf,
                    parallel: false,
                    body: Vec::new(),
                });
                nest = vec![Stmt::Loop(Loop {
                    start: Expr::var(&tile),
                    end: tile_end(level.end, &tile, bf),
                    body: nest,
                    ..level
                })];
            } else {
                nest = vec![Stmt::Loop(Loop { body: nest, ..level })];
            }
        }

        // tiling loops wrap them, the outermost one running in parallel
        let outermost = tiles.len().saturating_sub(1);
        for (position, tile) in tiles.into_iter().enumerate() {
            nest = vec![Stmt::Loop(Loop {
                parallel: position == outermost,
                body: nest,
                ..tile
            })];
        }
        nest
    }
}

/// Counted, unit-step, sequential loop with literal bounds
fn is_plain(l: &Loop) -> bool {
    l.step == 1 && !l.parallel && l.constant_extent().is_some()
}

/// Detach the outer one or two levels of a nest from the statements they run
fn split_nest(mut outer: Loop) -> (Vec<Loop>, Vec<Stmt>) {
    let body = std::mem::take(&mut outer.body);
    match <[Stmt; 1]>::try_from(body) {
        Ok([Stmt::Loop(mut inner)]) => {
            let body = std::mem::take(&mut inner.body);
            (vec![outer, inner], body)
        }
        Ok([other]) => (vec![outer], vec![other]),
        Err(body) => (vec![outer], body),
    }
}

impl Default for LoopBlocking {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_FACTOR)
    }
}

/// `min(end, tile + bf)`
fn tile_end(end: Expr, tile: &str, bf: i64) -> Expr {
    Expr::binary(
        BinOp::Min,
        end,
        Expr::binary(BinOp::Add, Expr::var(tile), Expr::int(bf)),
    )
}
