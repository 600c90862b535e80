use crate::chess::{Color, Move, Piece, Position, Role, Square, Zobrist};
use crate::eval::{Evaluator, Value, MAX_PLY, PIECE_VALUE_EG, PIECE_VALUE_MG, TEMPO};
use crate::search::*;
use crate::syzygy::Tablebase;
use crate::util::Assume;
use arrayvec::ArrayVec;
use futures::channel::mpsc::UnboundedSender;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Duration;

const TT_HIT_AVERAGE_WINDOW: u64 = 4096;
const TT_HIT_AVERAGE_RESOLUTION: u64 = 1024;

const RAZOR_MARGIN: i32 = 510;

#[inline(always)]
fn futility_margin(depth: Depth, improving: bool) -> i32 {
    234 * (depth - improving as i32)
}

#[inline(always)]
fn futility_move_count(improving: bool, depth: Depth) -> i32 {
    (3 + depth * depth) / (2 - improving as i32)
}

#[inline(always)]
fn excluded_key(key: Zobrist, excluded: Option<Move>) -> Zobrist {
    match excluded {
        None => key,
        Some(m) => key ^ (m.bits() as u64).wrapping_mul(0x9E3779B97F4A7C15),
    }
}

/// The heuristic tables owned by a worker thread.
///
/// Created at worker start, cleared on `ucinewgame`, and written only by
/// the owning thread.
#[derive(Debug, Default, Clone)]
pub struct Histories {
    pub main: ButterflyHistory,
    pub low_ply: LowPlyHistory,
    pub capture: CaptureHistory,
    pub continuation: ContinuationHistory,
    pub counters: CounterMoveHistory,
}

impl Histories {
    pub fn clear(&mut self) {
        self.main.clear();
        self.low_ply.clear();
        self.capture.clear();
        self.continuation.clear();
        self.counters.clear();
    }
}

/// What a worker hands back when the search concludes.
#[derive(Debug)]
pub struct WorkerReport {
    pub root_moves: Vec<RootMove>,
    pub completed_depth: Depth,
    pub histories: Histories,
    pub time_reduction: f64,
}

/// A single search thread.
pub struct Worker<'a> {
    id: usize,
    threads: usize,
    ctrl: &'a Control,
    tt: &'a TranspositionTable,
    crumbs: &'a Breadcrumbs,
    tb: &'a Tablebase,
    options: &'a Options,
    sink: Option<UnboundedSender<Info>>,

    root: Position,
    evaluator: Evaluator,
    stack: Stack,
    pub histories: Histories,
    reductions: Vec<i32>,
    rng: SmallRng,

    pub root_moves: Vec<RootMove>,
    root_depth: Depth,
    pub completed_depth: Depth,
    sel_depth: i32,
    nodes: u64,
    calls_cnt: i64,
    tt_hit_average: u64,
    nmp_min_ply: i32,
    nmp_color: Color,
    pv_idx: usize,
    pv_last: usize,
    failed_high_cnt: i32,
    search_again_counter: i32,
    best_move_changes: f64,
    ct: i32,

    tb_cardinality: usize,
    tb_probe_depth: Depth,
    tb_use_rule50: bool,
    pub root_in_tb: bool,

    best_previous_score: Value,
    previous_time_reduction: f64,
    time_reduction: f64,
    iter_value: [Value; 4],
}

impl<'a> Worker<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        threads: usize,
        root: Position,
        histories: Histories,
        ctrl: &'a Control,
        tt: &'a TranspositionTable,
        crumbs: &'a Breadcrumbs,
        tb: &'a Tablebase,
        options: &'a Options,
        sink: Option<UnboundedSender<Info>>,
        best_previous_score: Value,
        previous_time_reduction: f64,
    ) -> Self {
        // The reduction table is seeded by the thread count so that
        // workers explore slightly different trees.
        let reductions = (0..256)
            .map(|i| {
                let i = i as f64;
                ((21.3 + 2.0 * (threads as f64).ln()) * (i + 0.25 * i.max(1.0).ln()).max(1.0).ln())
                    as i32
            })
            .collect();

        let us = root.turn();

        Worker {
            id,
            threads,
            ctrl,
            tt,
            crumbs,
            tb,
            options,
            sink,
            evaluator: Evaluator::new(us, 0, false),
            root,
            stack: Stack::default(),
            histories,
            reductions,
            rng: SmallRng::seed_from_u64(0x9E3779B97F4A7C15 ^ id as u64),
            root_moves: Vec::new(),
            root_depth: 0,
            completed_depth: 0,
            sel_depth: 0,
            nodes: 0,
            calls_cnt: 1,
            tt_hit_average: TT_HIT_AVERAGE_WINDOW * TT_HIT_AVERAGE_RESOLUTION / 2,
            nmp_min_ply: 0,
            nmp_color: Color::White,
            pv_idx: 0,
            pv_last: 0,
            failed_high_cnt: 0,
            search_again_counter: 0,
            best_move_changes: 0.0,
            ct: 0,
            tb_cardinality: 0,
            tb_probe_depth: 1,
            tb_use_rule50: true,
            root_in_tb: false,
            best_previous_score,
            previous_time_reduction,
            time_reduction: 1.0,
            iter_value: [Value::ZERO; 4],
        }
    }

    #[inline(always)]
    fn is_main(&self) -> bool {
        self.id == 0
    }

    #[inline(always)]
    fn reduction(&self, improving: bool, depth: Depth, move_count: i32) -> Depth {
        let d = self.reductions[(depth as usize).min(255)];
        let mn = self.reductions[(move_count as usize).min(255)];
        let r = d * mn;
        (r + 503) / 1024 + ((!improving && r > 915) as i32)
    }

    /// A drawn score with a tiny random component to break threefold
    /// blindness.
    #[inline(always)]
    fn value_draw(&self) -> Value {
        Value::DRAW + Value::new(2 * (self.nodes & 1) as i32 - 1)
    }

    #[inline(always)]
    fn count_node(&mut self) {
        self.nodes += 1;
        self.ctrl.count_nodes(1);
    }

    fn cont_keys(&self, ss: usize) -> ContKeys {
        let mut keys = [None; 6];
        for i in [1usize, 2, 4, 6] {
            if self.stack.at(ss - i).played.is_ok() {
                keys[i - 1] = self.stack.at(ss - i).cont_key;
            }
        }

        keys
    }

    /// Applies a bonus to the continuation histories of the moves leading
    /// to this node, at offsets 1, 2, 4, and 6; offsets beyond 2 are
    /// skipped while in check.
    fn update_continuation_histories(&mut self, ss: usize, piece: Piece, to: Square, bonus: i32) {
        for i in [1usize, 2, 4, 6] {
            if self.stack.at(ss).in_check && i > 2 {
                break;
            }

            if self.stack.at(ss - i).played.is_ok() {
                if let Some(key) = self.stack.at(ss - i).cont_key {
                    self.histories.continuation.update(&key, piece, to, bonus);
                }
            }
        }
    }

    /// Updates move sorting heuristics for a quiet move.
    fn update_quiet_stats(&mut self, pos: &Position, ss: usize, m: Move, bonus: i32, depth: Depth) {
        let frame = self.stack.at_mut(ss);
        if frame.killers[0] != Some(m) {
            frame.killers[1] = frame.killers[0];
            frame.killers[0] = Some(m);
        }

        let us = pos.turn().index();
        self.histories.main.update(us, m, bonus);

        let piece = pos.moved_piece(m).assume();
        self.update_continuation_histories(ss, piece, m.whither(), bonus);

        // Penalize shuffling the same piece back.
        if piece.role() != Role::Pawn {
            self.histories.main.update(us, m.reverse(), -bonus);
        }

        if let Played::Move(prev) = self.stack.at(ss - 1).played {
            let prev_sq = prev.whither();
            if let Some(prev_piece) = pos.piece_on(prev_sq) {
                self.histories.counters.set(prev_piece, prev_sq, m);
            }
        }

        let ply = self.stack.at(ss).ply;
        if depth > 11 && (ply as usize) < MAX_LPH {
            self.histories
                .low_ply
                .update(ply as usize, m, stat_bonus(depth - 7));
        }
    }

    /// Updates all statistics once a best move is confirmed at a node.
    #[allow(clippy::too_many_arguments)]
    fn update_all_stats(
        &mut self,
        pos: &Position,
        ss: usize,
        best_move: Move,
        best_value: Value,
        beta: Value,
        prev_sq: Option<Square>,
        quiets: &[Move],
        captures: &[Move],
        depth: Depth,
    ) {
        let us = pos.turn().index();
        let bonus1 = stat_bonus(depth + 1);
        let bonus2 = if best_value > beta + Value::new(PIECE_VALUE_MG[0]) {
            bonus1
        } else {
            stat_bonus(depth)
        };

        if best_move.is_quiet() {
            self.update_quiet_stats(pos, ss, best_move, bonus2, depth);

            for &m in quiets {
                self.histories.main.update(us, m, -bonus2);
                let piece = pos.moved_piece(m).assume();
                self.update_continuation_histories(ss, piece, m.whither(), -bonus2);
            }
        } else {
            let piece = pos.moved_piece(best_move).assume();
            let captured = pos.captured(best_move).map_or(0, Role::index);
            self.histories
                .capture
                .update(piece, best_move.whither(), captured, bonus1);
        }

        // Extra penalty for an early quiet move of the previous ply that
        // got refuted.
        let prev = self.stack.at(ss - 1);
        let early = prev.move_count <= 1 + prev.tt_hit as i32
            || prev.played.as_move().is_some() && prev.played.as_move() == prev.killers[0];
        if early && pos.captured_last().is_none() {
            if let Some(sq) = prev_sq {
                if let Some(piece) = pos.piece_on(sq) {
                    self.update_continuation_histories(ss - 1, piece, sq, -bonus1);
                }
            }
        }

        for &m in captures {
            let piece = pos.moved_piece(m).assume();
            let captured = pos.captured(m).map_or(0, Role::index);
            self.histories
                .capture
                .update(piece, m.whither(), captured, -bonus1);
        }
    }

    /// The quiescence search, extending the static evaluation on tactical
    /// lines at depth zero and below.
    fn qsearch<const PV: bool>(
        &mut self,
        pos: &Position,
        ss: usize,
        mut alpha: Value,
        beta: Value,
        depth: Depth,
    ) -> Value {
        debug_assert!(-Value::INFINITE <= alpha && alpha < beta && beta <= Value::INFINITE);
        debug_assert!(PV || alpha == beta - Value::new(1));
        debug_assert!(depth <= 0);

        let ply = self.stack.at(ss).ply;
        let old_alpha = alpha;
        let in_check = pos.is_check();

        {
            let frame = self.stack.at_mut(ss);
            frame.in_check = in_check;
            frame.move_count = 0;
            if PV {
                frame.pv.clear();
            }
        }

        if pos.is_draw() || ply >= MAX_PLY {
            return if ply >= MAX_PLY && !in_check {
                self.evaluator.evaluate(pos)
            } else {
                Value::DRAW
            };
        }

        // Only two depths are distinguished in the table for quiescence
        // nodes: with and without quiet checks.
        let tt_depth = if in_check || depth >= DEPTH_QS_CHECKS {
            DEPTH_QS_CHECKS
        } else {
            DEPTH_QS_NO_CHECKS
        };

        let key = pos.zobrist();
        let tte = self.tt.probe(key);
        let tt_hit = tte.is_some();
        let tt_value = tte.map_or(Value::NONE, |t| t.value.from_tt(ply, pos.halfmoves()));
        let tt_move = tte.and_then(|t| t.best);
        let pv_hit = tte.is_some_and(|t| t.is_pv);
        self.stack.at_mut(ss).tt_hit = tt_hit;

        if !PV
            && tt_value != Value::NONE
            && tte.is_some_and(|t| {
                t.depth >= tt_depth
                    && if tt_value >= beta {
                        t.bound.is_lower()
                    } else {
                        t.bound.is_upper()
                    }
            })
        {
            return tt_value;
        }

        let mut best_value;
        let mut futility_base;

        if in_check {
            self.stack.at_mut(ss).static_eval = Value::NONE;
            best_value = -Value::INFINITE;
            futility_base = -Value::INFINITE;
        } else {
            if let Some(t) = tte {
                best_value = if t.eval == Value::NONE {
                    self.evaluator.evaluate(pos)
                } else {
                    t.eval
                };
                self.stack.at_mut(ss).static_eval = best_value;

                if tt_value != Value::NONE
                    && if tt_value > best_value {
                        t.bound.is_lower()
                    } else {
                        t.bound.is_upper()
                    }
                {
                    best_value = tt_value;
                }
            } else {
                best_value = if self.stack.at(ss - 1).played == Played::Null {
                    -self.stack.at(ss - 1).static_eval + Value::new(2 * TEMPO)
                } else {
                    self.evaluator.evaluate(pos)
                };
                self.stack.at_mut(ss).static_eval = best_value;
            }

            // Stand pat.
            if best_value >= beta {
                if !tt_hit {
                    self.tt.save(
                        key,
                        best_value.to_tt(ply),
                        false,
                        Bound::Lower,
                        DEPTH_NONE,
                        None,
                        self.stack.at(ss).static_eval,
                    );
                }

                return best_value;
            }

            if PV && best_value > alpha {
                alpha = best_value;
            }

            futility_base = best_value + Value::new(155);
        }

        let cont_keys = self.cont_keys(ss);
        let mut picker = MovePicker::new_quiescence(
            pos,
            tt_move,
            depth,
            &self.histories.main,
            &self.histories.capture,
            &self.histories.continuation,
            &cont_keys,
        );

        let mut best_move = None;
        let mut move_count = 0;

        while let Some(m) = picker.next(false) {
            let gives_check = pos.gives_check(m);
            let capture_or_promotion = !m.is_quiet();

            move_count += 1;

            // Futility pruning against quiet stand-pat gains.
            if best_value > Value::TB_LOSS_IN_MAX_PLY
                && !gives_check
                && futility_base > -Value::KNOWN_WIN
                && !pos.advanced_pawn_push(m)
            {
                if move_count > 2 {
                    continue;
                }

                let futility_value =
                    futility_base + Value::new(crate::eval::captured_value_eg(pos, m.whither()));

                if futility_value <= alpha {
                    best_value = best_value.max(futility_value);
                    continue;
                }

                if futility_base <= alpha && !pos.see_ge(m, 1) {
                    best_value = best_value.max(futility_base);
                    continue;
                }
            }

            // Skip losing exchanges, unless they uncover a check.
            if best_value > Value::TB_LOSS_IN_MAX_PLY
                && !(gives_check && pos.is_discovery_check(m))
                && !pos.see_ge(m, 0)
            {
                continue;
            }

            self.tt.prefetch(pos.zobrist_after(m));

            {
                let frame = self.stack.at_mut(ss);
                frame.played = Played::Move(m);
                frame.cont_key = Some(ContinuationKey {
                    in_check,
                    capture: capture_or_promotion,
                    piece: pos.moved_piece(m).assume(),
                    to: m.whither(),
                });
            }

            // Continuation history pruning for quiet evasions and checks.
            if !capture_or_promotion && best_value > Value::TB_LOSS_IN_MAX_PLY {
                let piece = pos.moved_piece(m).assume();
                let h0 = cont_keys[0].map_or(0, |k| {
                    self.histories.continuation.get(&k, piece, m.whither())
                });
                let h1 = cont_keys[1].map_or(0, |k| {
                    self.histories.continuation.get(&k, piece, m.whither())
                });

                if h0 < COUNTER_MOVE_PRUNE_THRESHOLD && h1 < COUNTER_MOVE_PRUNE_THRESHOLD {
                    continue;
                }
            }

            let mut next = pos.clone();
            next.play(m);
            self.count_node();

            let value = -self.qsearch::<PV>(&next, ss + 1, -beta, -alpha, depth - 1);

            debug_assert!(value > -Value::INFINITE && value < Value::INFINITE);

            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = Some(m);

                    if PV {
                        self.stack.update_pv(ss, m);
                    }

                    if PV && value < beta {
                        alpha = value;
                    } else {
                        break;
                    }
                }
            }
        }

        if in_check && best_value == -Value::INFINITE {
            debug_assert!(pos.moves().is_empty());
            return Value::mated_in(ply);
        }

        let bound = if best_value >= beta {
            Bound::Lower
        } else if PV && best_value > old_alpha {
            Bound::Exact
        } else {
            Bound::Upper
        };

        self.tt.save(
            key,
            best_value.to_tt(ply),
            pv_hit,
            bound,
            tt_depth,
            best_move,
            self.stack.at(ss).static_eval,
        );

        debug_assert!(best_value > -Value::INFINITE && best_value < Value::INFINITE);
        best_value
    }

    /// The main alpha-beta search.
    #[allow(clippy::too_many_lines)]
    fn search<const PV: bool>(
        &mut self,
        pos: &Position,
        ss: usize,
        mut alpha: Value,
        mut beta: Value,
        mut depth: Depth,
        cut_node: bool,
    ) -> Value {
        let ply = self.stack.at(ss).ply;
        let root_node = PV && ply == 0;
        let max_next_depth = if root_node { depth } else { depth + 1 };

        // An upcoming repetition draws; raise alpha to the drawn score.
        if pos.has_repeated() && alpha < Value::DRAW && !root_node {
            alpha = self.value_draw();
            if alpha >= beta {
                return alpha;
            }
        }

        if depth <= 0 {
            return self.qsearch::<PV>(pos, ss, alpha, beta, 0);
        }

        debug_assert!(-Value::INFINITE <= alpha && alpha < beta && beta <= Value::INFINITE);
        debug_assert!(PV || alpha == beta - Value::new(1));
        debug_assert!(0 < depth && depth < MAX_PLY);
        debug_assert!(!(PV && cut_node));

        let in_check = pos.is_check();
        let prior_capture = pos.captured_last();
        let us = pos.turn();
        let mut best_value = -Value::INFINITE;
        let mut max_value = Value::INFINITE;

        {
            let frame = self.stack.at_mut(ss);
            frame.in_check = in_check;
            frame.move_count = 0;
        }

        if self.is_main() {
            let mut calls = self.calls_cnt;
            self.ctrl.check_time(&mut calls);
            self.calls_cnt = calls;
        }

        if PV && self.sel_depth < ply + 1 {
            self.sel_depth = ply + 1;
        }

        if !root_node {
            // Abort or immediate draw.
            if self.ctrl.stopped() || pos.is_draw() || ply >= MAX_PLY {
                return if ply >= MAX_PLY && !in_check {
                    self.evaluator.evaluate(pos)
                } else {
                    self.value_draw()
                };
            }

            // Mate distance pruning. Even a mate on the next move cannot
            // improve on a shorter mate found upward in the tree.
            alpha = alpha.max(Value::mated_in(ply));
            beta = beta.min(Value::mate_in(ply + 1));
            if alpha >= beta {
                return alpha;
            }
        }

        debug_assert!((0..MAX_PLY).contains(&ply));

        self.stack.at_mut(ss + 1).tt_pv = false;
        self.stack.at_mut(ss + 1).excluded = None;
        self.stack.at_mut(ss + 2).killers = [None, None];
        if !root_node {
            self.stack.at_mut(ss + 2).stat_score = 0;
        }

        let prev_sq = self.stack.at(ss - 1).played.as_move().map(Move::whither);
        let mut best_move: Option<Move> = None;

        // Transposition table lookup. Singular verification searches use
        // a different key so a partial search never overwrites the full
        // one.
        let excluded = self.stack.at(ss).excluded;
        let key = excluded_key(pos.zobrist(), excluded);
        let tte = self.tt.probe(key);
        let tt_hit = tte.is_some();
        let tt_value = tte.map_or(Value::NONE, |t| t.value.from_tt(ply, pos.halfmoves()));
        let tt_move = if root_node {
            Some(self.root_moves[self.pv_idx].head())
        } else {
            tte.and_then(|t| t.best)
        };

        {
            let frame = self.stack.at_mut(ss);
            frame.tt_hit = tt_hit;
            if excluded.is_none() {
                frame.tt_pv = PV || (tt_hit && tte.is_some_and(|t| t.is_pv));
            }
        }

        let tt_pv = self.stack.at(ss).tt_pv;
        let former_pv = tt_pv && !PV;

        if tt_pv
            && depth > 12
            && ply - 1 < MAX_LPH as i32
            && prior_capture.is_none()
            && self.stack.at(ss - 1).played.is_ok()
        {
            if let Played::Move(prev) = self.stack.at(ss - 1).played {
                self.histories
                    .low_ply
                    .update((ply - 1) as usize, prev, stat_bonus(depth - 5));
            }
        }

        // Running average of transposition hits.
        self.tt_hit_average = (TT_HIT_AVERAGE_WINDOW - 1) * self.tt_hit_average
            / TT_HIT_AVERAGE_WINDOW
            + TT_HIT_AVERAGE_RESOLUTION * tt_hit as u64;

        // At non-PV nodes we check for an early cutoff.
        if !PV
            && tt_hit
            && tt_value != Value::NONE
            && tte.is_some_and(|t| t.depth >= depth)
            && tte.is_some_and(|t| {
                if tt_value >= beta {
                    t.bound.is_lower()
                } else {
                    t.bound.is_upper()
                }
            })
        {
            if let Some(tt_move) = tt_move {
                if tt_value >= beta {
                    if tt_move.is_quiet() {
                        self.update_quiet_stats(pos, ss, tt_move, stat_bonus(depth), depth);
                    }

                    // Extra penalty for early quiet moves of the previous
                    // ply.
                    if self.stack.at(ss - 1).move_count <= 2 && prior_capture.is_none() {
                        if let Some(sq) = prev_sq {
                            if let Some(piece) = pos.piece_on(sq) {
                                self.update_continuation_histories(
                                    ss - 1,
                                    piece,
                                    sq,
                                    -stat_bonus(depth + 1),
                                );
                            }
                        }
                    }
                } else if tt_move.is_quiet() {
                    let penalty = -stat_bonus(depth);
                    self.histories.main.update(us.index(), tt_move, penalty);
                    if let Some(piece) = pos.moved_piece(tt_move) {
                        self.update_continuation_histories(ss, piece, tt_move.whither(), penalty);
                    }
                }
            }

            // Fifty-move shuffling makes old scores unreliable.
            if pos.halfmoves() < 90 {
                return tt_value;
            }
        }

        // Tablebase probe.
        if !root_node && self.tb_cardinality > 0 {
            let pieces = pos.count();

            if pieces <= self.tb_cardinality
                && (pieces < self.tb_cardinality || depth >= self.tb_probe_depth)
                && pos.halfmoves() == 0
                && !pos.castles().any()
            {
                if self.is_main() {
                    self.calls_cnt = 0;
                }

                if let Some(wdl) = self.tb.probe_wdl(pos) {
                    self.ctrl.count_tb_hit();

                    let draw_score = self.tb_use_rule50 as i32;
                    let wdl = wdl as i32;

                    let value = if wdl < -draw_score {
                        Value::MATED_IN_MAX_PLY + Value::new(ply + 1)
                    } else if wdl > draw_score {
                        Value::MATE_IN_MAX_PLY - Value::new(ply + 1)
                    } else {
                        Value::DRAW + Value::new(2 * wdl * draw_score)
                    };

                    let bound = if wdl < -draw_score {
                        Bound::Upper
                    } else if wdl > draw_score {
                        Bound::Lower
                    } else {
                        Bound::Exact
                    };

                    if bound == Bound::Exact
                        || (bound == Bound::Lower && value >= beta)
                        || (bound == Bound::Upper && value <= alpha)
                    {
                        self.tt.save(
                            key,
                            value.to_tt(ply),
                            tt_pv,
                            bound,
                            (depth + 6).min(MAX_PLY - 1),
                            None,
                            Value::NONE,
                        );

                        return value;
                    }

                    if PV {
                        if bound == Bound::Lower {
                            best_value = value;
                            alpha = alpha.max(best_value);
                        } else {
                            max_value = value;
                        }
                    }
                }
            }
        }

        let mut improving = false;

        if in_check {
            // Skip early pruning when in check.
            self.stack.at_mut(ss).static_eval = Value::NONE;
        } else {
            let mut eval;
            if let Some(t) = tte {
                // Never assume anything about values stored in the table.
                eval = t.eval;
                if eval == Value::NONE {
                    eval = self.evaluator.evaluate(pos);
                }
                self.stack.at_mut(ss).static_eval = eval;

                if eval == Value::DRAW {
                    eval = self.value_draw();
                }

                // The table value may be a tighter position evaluation.
                if tt_value != Value::NONE
                    && if tt_value > eval {
                        t.bound.is_lower()
                    } else {
                        t.bound.is_upper()
                    }
                {
                    eval = tt_value;
                }
            } else {
                eval = if self.stack.at(ss - 1).played == Played::Null {
                    -self.stack.at(ss - 1).static_eval + Value::new(2 * TEMPO)
                } else {
                    self.evaluator.evaluate(pos)
                };
                self.stack.at_mut(ss).static_eval = eval;

                self.tt
                    .save(key, Value::NONE, tt_pv, Bound::None, DEPTH_NONE, None, eval);
            }

            // Razoring.
            if !root_node && depth == 1 && eval <= alpha - Value::new(RAZOR_MARGIN) {
                return self.qsearch::<PV>(pos, ss, alpha, beta, 0);
            }

            let eval_2 = self.stack.at(ss - 2).static_eval;
            let eval_4 = self.stack.at(ss - 4).static_eval;
            let static_eval = self.stack.at(ss).static_eval;
            improving = if eval_2 == Value::NONE {
                static_eval > eval_4 || eval_4 == Value::NONE
            } else {
                static_eval > eval_2
            };

            // Futility pruning for the child node.
            if !PV
                && depth < 8
                && eval - Value::new(futility_margin(depth, improving)) >= beta
                && eval < Value::KNOWN_WIN
            {
                return eval;
            }

            // Null move search with verification.
            let static_eval = self.stack.at(ss).static_eval;
            if !PV
                && self.stack.at(ss - 1).played != Played::Null
                && self.stack.at(ss - 1).stat_score < 22977
                && eval >= beta
                && eval >= static_eval
                && static_eval
                    >= beta - Value::new(30 * depth) - Value::new(28 * improving as i32)
                        + Value::new(84 * tt_pv as i32)
                        + Value::new(168)
                && excluded.is_none()
                && pos.non_pawn_material(us) > 0
                && (ply >= self.nmp_min_ply || us != self.nmp_color)
            {
                debug_assert!(eval >= beta);

                // Dynamic reduction based on depth and eval surplus.
                let r = (1015 + 85 * depth) / 256 + ((eval - beta).get() / 191).min(3);

                {
                    let frame = self.stack.at_mut(ss);
                    frame.played = Played::Null;
                    frame.cont_key = None;
                }

                let mut next = pos.clone();
                next.pass();
                self.tt.prefetch(next.zobrist());
                self.count_node();

                let null_value =
                    -self.search::<false>(&next, ss + 1, -beta, -beta + Value::new(1), depth - r, !cut_node);

                if null_value >= beta {
                    // Do not return unproven mate or tablebase scores.
                    let null_value = if null_value >= Value::TB_WIN_IN_MAX_PLY {
                        beta
                    } else {
                        null_value
                    };

                    if self.nmp_min_ply != 0 || (beta.get().abs() < Value::KNOWN_WIN.get() && depth < 14) {
                        return null_value;
                    }

                    debug_assert!(self.nmp_min_ply == 0);

                    // Verification search at high depths, with null move
                    // pruning disabled for us until ply exceeds nmp_min_ply.
                    self.nmp_min_ply = ply + 3 * (depth - r) / 4;
                    self.nmp_color = us;

                    let v = self.search::<false>(pos, ss, beta - Value::new(1), beta, depth - r, false);

                    self.nmp_min_ply = 0;

                    if v >= beta {
                        return null_value;
                    }
                }
            }

            let prob_cut_beta = beta + Value::new(183 - 49 * improving as i32);

            // ProbCut: a good capture confirmed by a reduced search much
            // above beta almost certainly refutes the previous move.
            if !PV
                && depth > 4
                && beta.get().abs() < Value::TB_WIN_IN_MAX_PLY.get()
                && !(tt_hit
                    && tte.is_some_and(|t| t.depth >= depth - 3)
                    && tt_value != Value::NONE
                    && tt_value < prob_cut_beta)
            {
                if tt_hit
                    && tte.is_some_and(|t| t.depth >= depth - 3)
                    && tt_value != Value::NONE
                    && tt_value >= prob_cut_beta
                    && tt_move.is_some_and(|m| !m.is_quiet())
                {
                    return prob_cut_beta;
                }

                debug_assert!(prob_cut_beta < Value::INFINITE);

                let static_eval = self.stack.at(ss).static_eval;
                let mut picker = MovePicker::new_probcut(
                    pos,
                    tt_move,
                    (prob_cut_beta - static_eval).get(),
                    &self.histories.capture,
                );

                let mut prob_cut_count = 0;
                let saved_tt_pv = tt_pv;
                self.stack.at_mut(ss).tt_pv = false;

                while let Some(m) = picker.next(false) {
                    if prob_cut_count >= 2 + 2 * cut_node as i32 {
                        break;
                    }

                    if Some(m) == excluded {
                        continue;
                    }

                    prob_cut_count += 1;

                    {
                        let frame = self.stack.at_mut(ss);
                        frame.played = Played::Move(m);
                        frame.cont_key = Some(ContinuationKey {
                            in_check,
                            capture: true,
                            piece: pos.moved_piece(m).assume(),
                            to: m.whither(),
                        });
                    }

                    let mut next = pos.clone();
                    next.play(m);
                    self.count_node();

                    // A preliminary qsearch verifies the move holds.
                    let mut value = -self.qsearch::<false>(
                        &next,
                        ss + 1,
                        -prob_cut_beta,
                        -prob_cut_beta + Value::new(1),
                        0,
                    );

                    if value >= prob_cut_beta {
                        value = -self.search::<false>(
                            &next,
                            ss + 1,
                            -prob_cut_beta,
                            -prob_cut_beta + Value::new(1),
                            depth - 4,
                            !cut_node,
                        );
                    }

                    if value >= prob_cut_beta {
                        if !(tt_hit
                            && tte.is_some_and(|t| t.depth >= depth - 3)
                            && tt_value != Value::NONE)
                        {
                            self.tt.save(
                                key,
                                value.to_tt(ply),
                                saved_tt_pv,
                                Bound::Lower,
                                depth - 3,
                                Some(m),
                                static_eval,
                            );
                        }

                        self.stack.at_mut(ss).tt_pv = saved_tt_pv;
                        return value;
                    }
                }

                self.stack.at_mut(ss).tt_pv = saved_tt_pv;
            }

            // If the position is not in the table, decrease the depth.
            if PV && depth >= 6 && tt_move.is_none() {
                depth -= 2;
            }
        }

        // The moves loop begins here; when in check the search jumps
        // straight to it.

        let tt_pv = self.stack.at(ss).tt_pv;
        let cont_keys = self.cont_keys(ss);

        let counter = prev_sq
            .and_then(|sq| pos.piece_on(sq).map(|p| (p, sq)))
            .and_then(|(p, sq)| self.histories.counters.get(p, sq));

        let killers = self.stack.at(ss).killers;
        let mut picker = MovePicker::new_main(
            pos,
            tt_move,
            depth,
            &self.histories.main,
            &self.histories.low_ply,
            &self.histories.capture,
            &self.histories.continuation,
            &cont_keys,
            counter,
            killers,
            ply,
        );

        let mut value = best_value;
        let mut move_count = 0;
        let mut singular_quiet_lmr = false;
        let mut move_count_pruning = false;
        let tt_capture = tt_move.is_some_and(|m| !m.is_quiet());

        // Mark this node as being searched.
        let footprint = self.crumbs.visit(self.id, key, ply);

        let mut quiets_searched: ArrayVec<Move, 64> = ArrayVec::new();
        let mut captures_searched: ArrayVec<Move, 32> = ArrayVec::new();

        while let Some(m) = picker.next(move_count_pruning) {
            if Some(m) == excluded {
                continue;
            }

            // At the root, obey the `searchmoves` restriction and skip PV
            // lines already searched.
            if root_node
                && !self.root_moves[self.pv_idx..self.pv_last]
                    .iter()
                    .any(|rm| rm.head() == m)
            {
                continue;
            }

            move_count += 1;
            self.stack.at_mut(ss).move_count = move_count;

            if PV {
                self.stack.at_mut(ss + 1).pv.clear();
            }

            let capture_or_promotion = !m.is_quiet();
            let moved_piece = pos.moved_piece(m).assume();
            let gives_check = pos.gives_check(m);

            let mut extension: Depth = 0;
            let mut new_depth = depth - 1;

            // Pruning at shallow depth.
            if !root_node
                && pos.non_pawn_material(us) > 0
                && best_value > Value::TB_LOSS_IN_MAX_PLY
            {
                move_count_pruning = move_count >= futility_move_count(improving, depth);

                let lmr_depth = (new_depth - self.reduction(improving, depth, move_count)).max(0);

                if !capture_or_promotion && !gives_check {
                    // Counter-move based pruning.
                    let prev = self.stack.at(ss - 1);
                    let threshold_depth =
                        4 + (prev.stat_score > 0 || prev.move_count == 1) as i32;

                    let h0 = cont_keys[0].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });
                    let h1 = cont_keys[1].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });

                    if lmr_depth < threshold_depth
                        && h0 < COUNTER_MOVE_PRUNE_THRESHOLD
                        && h1 < COUNTER_MOVE_PRUNE_THRESHOLD
                    {
                        continue;
                    }

                    // Futility pruning for the parent node.
                    let static_eval = self.stack.at(ss).static_eval;
                    let h3 = cont_keys[3].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });
                    let h5 = cont_keys[5].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });

                    if lmr_depth < 7
                        && !in_check
                        && static_eval + Value::new(266 + 170 * lmr_depth) <= alpha
                        && h0 + h1 + h3 + h5 / 2 < 27376
                    {
                        continue;
                    }

                    // Prune moves with a bad enough static exchange.
                    if !pos.see_ge(m, -(30 - lmr_depth.min(18)) * lmr_depth * lmr_depth) {
                        continue;
                    }
                } else {
                    // Capture history based pruning.
                    let captured = pos.captured(m).map_or(0, Role::index);
                    if !gives_check
                        && lmr_depth < 1
                        && self.histories.capture.get(moved_piece, m.whither(), captured) < 0
                    {
                        continue;
                    }

                    if !pos.see_ge(m, -213 * depth) {
                        continue;
                    }
                }
            }

            // Singular extension: if all moves but the table move fail low
            // on a reduced window, the table move is singular and deserves
            // more depth.
            if depth >= 7
                && Some(m) == tt_move
                && !root_node
                && excluded.is_none()
                && tt_value.get().abs() < Value::KNOWN_WIN.get()
                && tte.is_some_and(|t| t.bound.is_lower())
                && tte.is_some_and(|t| t.depth >= depth - 3)
            {
                let singular_beta =
                    tt_value - Value::new((former_pv as i32 + 4) * depth / 2);
                let singular_depth = (depth - 1 + 3 * former_pv as i32) / 2;

                self.stack.at_mut(ss).excluded = Some(m);
                let value = self.search::<false>(
                    pos,
                    ss,
                    singular_beta - Value::new(1),
                    singular_beta,
                    singular_depth,
                    cut_node,
                );
                self.stack.at_mut(ss).excluded = None;

                if value < singular_beta {
                    extension = 1;
                    singular_quiet_lmr = !tt_capture;
                } else if singular_beta >= beta {
                    // Multi-cut: several moves fail high; prune the whole
                    // subtree on a soft bound.
                    return singular_beta;
                } else if tt_value >= beta {
                    self.stack.at_mut(ss).excluded = Some(m);
                    let value = self.search::<false>(
                        pos,
                        ss,
                        beta - Value::new(1),
                        beta,
                        (depth + 3) / 2,
                        cut_node,
                    );
                    self.stack.at_mut(ss).excluded = None;

                    if value >= beta {
                        return beta;
                    }
                }
            } else if gives_check && (pos.is_discovery_check(m) || pos.see_ge(m, 0)) {
                // Check extension.
                extension = 1;
            } else if prior_capture
                .is_some_and(|r| PIECE_VALUE_EG[r.index()] > PIECE_VALUE_EG[Role::Pawn.index()])
                && pos.non_pawn_material(Color::White) + pos.non_pawn_material(Color::Black)
                    <= 2 * PIECE_VALUE_MG[Role::Rook.index()]
            {
                // Last captures extension.
                extension = 1;
            }

            // Late irreversible move extension.
            if Some(m) == tt_move
                && pos.halfmoves() > 80
                && (capture_or_promotion || moved_piece.role() == Role::Pawn)
            {
                extension = 2;
            }

            new_depth += extension;

            // Speculative prefetch as early as possible.
            self.tt.prefetch(pos.zobrist_after(m));

            {
                let frame = self.stack.at_mut(ss);
                frame.played = Played::Move(m);
                frame.cont_key = Some(ContinuationKey {
                    in_check,
                    capture: capture_or_promotion,
                    piece: moved_piece,
                    to: m.whither(),
                });
            }

            let mut next = pos.clone();
            next.play(m);
            self.count_node();

            // Late move reductions: search late moves at reduced depth and
            // only re-search on a fail high.
            let mut did_lmr = false;
            let do_full_depth_search;

            if depth >= 3
                && move_count > 1 + 2 * root_node as i32
                && (!capture_or_promotion
                    || move_count_pruning
                    || self.stack.at(ss).static_eval
                        + Value::new(crate::eval::captured_value_eg(pos, m.whither()))
                        <= alpha
                    || cut_node
                    || self.tt_hit_average
                        < 432 * TT_HIT_AVERAGE_RESOLUTION * TT_HIT_AVERAGE_WINDOW / 1024)
            {
                let mut r = self.reduction(improving, depth, move_count);

                // Decrease when transposition hits are plentiful.
                if self.tt_hit_average
                    > 537 * TT_HIT_AVERAGE_RESOLUTION * TT_HIT_AVERAGE_WINDOW / 1024
                {
                    r -= 1;
                }

                // Increase when other workers crowd this node.
                if footprint.marked() {
                    r += 1;
                }

                // Decrease for positions on or once on the PV.
                if tt_pv {
                    r -= 2;
                }

                // Increase when the best move has been stable.
                if (root_node || !PV) && depth > 10 && self.best_move_changes <= 2.0 {
                    r += 1;
                }

                if move_count_pruning && !former_pv {
                    r += 1;
                }

                // Decrease when the opponent had many replies.
                if self.stack.at(ss - 1).move_count > 13 {
                    r -= 1;
                }

                if singular_quiet_lmr {
                    r -= 1;
                }

                if !capture_or_promotion {
                    if tt_capture {
                        r += 1;
                    }

                    if root_node {
                        r += self.failed_high_cnt * self.failed_high_cnt * move_count / 512;
                    }

                    if cut_node {
                        r += 2;
                    } else if !pos.is_castling(m) && !next.see_ge(m.reverse(), 0) {
                        // The move escapes a capture.
                        r -= 2 + tt_pv as i32 - (moved_piece.role() == Role::Pawn) as i32;
                    }

                    let h0 = cont_keys[0].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });
                    let h1 = cont_keys[1].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });
                    let h3 = cont_keys[3].map_or(0, |k| {
                        self.histories.continuation.get(&k, moved_piece, m.whither())
                    });

                    let stat_score =
                        self.histories.main.get(us.index(), m) + h0 + h1 + h3 - 5287;
                    self.stack.at_mut(ss).stat_score = stat_score;

                    let prev_stat_score = self.stack.at(ss - 1).stat_score;
                    if stat_score >= -105 && prev_stat_score < -103 {
                        r -= 1;
                    } else if prev_stat_score >= -122 && stat_score < -129 {
                        r += 1;
                    }

                    r -= stat_score / 14884;
                } else {
                    // Late captures at low depth are rarely best.
                    if depth < 8 && move_count > 2 {
                        r += 1;
                    }

                    let static_eval = self.stack.at(ss).static_eval;
                    if !gives_check
                        && static_eval
                            + Value::new(crate::eval::captured_value_eg(pos, m.whither()))
                            + Value::new(210 * depth)
                            <= alpha
                    {
                        r += 1;
                    }
                }

                let d = (new_depth - r).clamp(1, new_depth);

                value =
                    -self.search::<false>(&next, ss + 1, -alpha - Value::new(1), -alpha, d, true);

                do_full_depth_search = value > alpha && d != new_depth;
                did_lmr = true;
            } else {
                do_full_depth_search = !PV || move_count > 1;
            }

            // Full depth search when reduction is skipped or fails high.
            if do_full_depth_search {
                value = -self.search::<false>(
                    &next,
                    ss + 1,
                    -alpha - Value::new(1),
                    -alpha,
                    new_depth,
                    !cut_node,
                );

                if did_lmr && !capture_or_promotion {
                    let mut bonus = if value > alpha {
                        stat_bonus(new_depth)
                    } else {
                        -stat_bonus(new_depth)
                    };

                    if Some(m) == self.stack.at(ss).killers[0] {
                        bonus += bonus / 4;
                    }

                    self.update_continuation_histories(ss, moved_piece, m.whither(), bonus);
                }
            }

            // For PV nodes only, do a full PV search on the first move or
            // after a fail high.
            if PV && (move_count == 1 || (value > alpha && (root_node || value < beta))) {
                self.stack.at_mut(ss + 1).pv.clear();

                value = -self.search::<true>(
                    &next,
                    ss + 1,
                    -beta,
                    -alpha,
                    max_next_depth.min(new_depth),
                    false,
                );
            }

            debug_assert!(value > -Value::INFINITE && value < Value::INFINITE);

            // A stopped search cannot trust its partial result.
            if self.ctrl.stopped() {
                return Value::ZERO;
            }

            if root_node {
                let sel_depth = self.sel_depth;
                let rm = self
                    .root_moves
                    .iter_mut()
                    .find(|rm| rm.head() == m)
                    .assume();

                if move_count == 1 || value > alpha {
                    rm.score = value;
                    rm.sel_depth = sel_depth;
                    rm.pv.truncate(1);
                    rm.pv.extend_from_slice(&self.stack.at(ss + 1).pv);

                    // Time management tracks how unstable the best move is.
                    if move_count > 1 {
                        self.best_move_changes += 1.0;
                        self.ctrl.count_best_move_change();
                    }
                } else {
                    rm.score = -Value::INFINITE;
                }
            }

            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = Some(m);

                    if PV && !root_node {
                        self.stack.update_pv(ss, m);
                    }

                    if PV && value < beta {
                        alpha = value;
                    } else {
                        debug_assert!(value >= beta);
                        self.stack.at_mut(ss).stat_score = 0;
                        break;
                    }
                }
            }

            if Some(m) != best_move {
                if capture_or_promotion {
                    let _ = captures_searched.try_push(m);
                } else {
                    let _ = quiets_searched.try_push(m);
                }
            }
        }

        drop(footprint);

        // With no legal moves searched it is either mate, stalemate, or a
        // failed singular verification.
        if move_count == 0 {
            best_value = if excluded.is_some() {
                alpha
            } else if in_check {
                Value::mated_in(ply)
            } else {
                Value::DRAW
            };
        } else if let Some(best_move) = best_move {
            self.update_all_stats(
                pos,
                ss,
                best_move,
                best_value,
                beta,
                prev_sq,
                &quiets_searched,
                &captures_searched,
                depth,
            );
        } else if (depth >= 3 || PV) && prior_capture.is_none() {
            // Bonus for the prior quiet move that caused the fail low.
            if let Some(sq) = prev_sq {
                if let Some(piece) = pos.piece_on(sq) {
                    self.update_continuation_histories(ss - 1, piece, sq, stat_bonus(depth));
                }
            }
        }

        if PV {
            best_value = best_value.min(max_value);
        }

        // If no good move was found and the previous position was on the
        // PV, the opponent's last move is probably good.
        if best_value <= alpha {
            let prev_tt_pv = self.stack.at(ss - 1).tt_pv;
            let frame = self.stack.at_mut(ss);
            frame.tt_pv = frame.tt_pv || (prev_tt_pv && depth > 3);
        } else if depth > 3 {
            let next_tt_pv = self.stack.at(ss + 1).tt_pv;
            let frame = self.stack.at_mut(ss);
            frame.tt_pv = frame.tt_pv && next_tt_pv;
        }

        if excluded.is_none() && !(root_node && self.pv_idx > 0) {
            let bound = if best_value >= beta {
                Bound::Lower
            } else if PV && best_move.is_some() {
                Bound::Exact
            } else {
                Bound::Upper
            };

            self.tt.save(
                key,
                best_value.to_tt(ply),
                self.stack.at(ss).tt_pv,
                bound,
                depth,
                best_move,
                self.stack.at(ss).static_eval,
            );
        }

        debug_assert!(best_value > -Value::INFINITE && best_value < Value::INFINITE);
        best_value
    }
}

impl<'a> Worker<'a> {
    /// Runs the search to completion and reports the result.
    pub fn run(mut self) -> WorkerReport {
        self.setup_root_moves();

        if self.root_moves.is_empty() {
            if self.is_main() {
                let score = if self.root.is_check() {
                    -Value::MATE
                } else {
                    Value::DRAW
                };

                self.send(Info {
                    depth: 0,
                    sel_depth: 0,
                    multipv: 1,
                    score,
                    bound: None,
                    wdl: None,
                    nodes: 0,
                    nps: 0,
                    hashfull: None,
                    tb_hits: 0,
                    time: self.ctrl.elapsed(),
                    pv: Vec::new(),
                });
            }
        } else {
            self.rank_root_moves();
            self.iterate();
        }

        if self.is_main() {
            self.ctrl.stop();
        }

        WorkerReport {
            root_moves: std::mem::take(&mut self.root_moves),
            completed_depth: self.completed_depth,
            histories: std::mem::take(&mut self.histories),
            time_reduction: self.time_reduction,
        }
    }

    fn send(&self, info: Info) {
        if let Some(sink) = &self.sink {
            let _ = sink.unbounded_send(info);
        }
    }

    fn setup_root_moves(&mut self) {
        let searchmoves = &self.ctrl.limits().searchmoves;
        self.root_moves = self
            .root
            .moves()
            .into_iter()
            .filter(|m| searchmoves.is_empty() || searchmoves.contains(m))
            .map(RootMove::new)
            .collect();
    }

    /// Configures tablebase probing and ranks the root moves.
    fn rank_root_moves(&mut self) {
        self.tb_cardinality = self.options.syzygy_probe_limit;
        self.tb_probe_depth = self.options.syzygy_probe_depth;
        self.tb_use_rule50 = self.options.syzygy_50_move_rule;
        self.root_in_tb = false;

        if self.tb_cardinality > self.tb.max_pieces() {
            self.tb_cardinality = self.tb.max_pieces();
            self.tb_probe_depth = 0;
        }

        if self.tb_cardinality >= self.root.count() && !self.root.castles().any() {
            self.root_in_tb = self.tb.rank_root_moves(&self.root, &mut self.root_moves);

            if self.root_in_tb {
                self.root_moves.sort_by_key(|rm| std::cmp::Reverse(rm.tb_rank));

                // With a successful ranking there is no need to probe
                // during the search unless we might be losing.
                if self.root_moves[0].tb_score <= Value::DRAW {
                    self.tb_cardinality = 0;
                }
            } else {
                for rm in &mut self.root_moves {
                    rm.tb_rank = 0;
                }
            }
        }
    }

    /// The iterative deepening loop.
    fn iterate(&mut self) {
        let us = self.root.turn();
        let limits = self.ctrl.limits().clone();

        self.stack.clear();
        self.histories.low_ply.shift();

        let mut last_best_move = self.root_moves[0].head();
        let mut last_best_move_depth: Depth = 0;
        let mut best_value = -Value::INFINITE;
        let mut iter_idx = 0;
        let mut tot_best_move_changes = 0.0;

        if self.is_main() {
            if self.best_previous_score == Value::INFINITE {
                self.iter_value = [Value::ZERO; 4];
            } else {
                self.iter_value = [self.best_previous_score; 4];
            }
        }

        let mut skill = Skill::new(self.options, &mut self.rng);

        // Contempt, from centipawns and the analysis-mode selector.
        let mut ct = self.options.contempt * PIECE_VALUE_EG[Role::Pawn.index()] / 100;
        if limits.infinite || self.options.analyse_mode {
            ct = match self.options.analysis_contempt {
                AnalysisContempt::Off => 0,
                AnalysisContempt::Both => ct,
                AnalysisContempt::White if us == Color::Black => -ct,
                AnalysisContempt::Black if us == Color::White => -ct,
                _ => ct,
            };
        }

        self.ct = ct;

        // Analysis prefers the hybrid evaluator; games use the fast one.
        self.evaluator = Evaluator::new(us, ct, self.options.analyse_mode);

        let mut multi_pv = self.options.multi_pv;
        if skill.enabled() {
            multi_pv = multi_pv.max(4);
        }

        multi_pv = multi_pv.min(self.root_moves.len());

        while {
            self.root_depth += 1;
            self.root_depth < MAX_PLY
                && !self.ctrl.stopped()
                && !(self.is_main() && limits.depth.is_some_and(|d| self.root_depth > d))
        } {
            // Age out the PV variability metric.
            if self.is_main() {
                tot_best_move_changes /= 2.0;
            }

            self.best_move_changes /= 2.0;

            for rm in &mut self.root_moves {
                rm.previous_score = rm.score;
            }

            let mut pv_first = 0;
            self.pv_last = 0;

            if !self.ctrl.increase_depth() {
                self.search_again_counter += 1;
            }

            self.pv_idx = 0;
            while self.pv_idx < multi_pv && !self.ctrl.stopped() {
                if self.pv_idx == self.pv_last {
                    pv_first = self.pv_last;
                    self.pv_last += 1;
                    while self.pv_last < self.root_moves.len() {
                        if self.root_moves[self.pv_last].tb_rank
                            != self.root_moves[pv_first].tb_rank
                        {
                            break;
                        }

                        self.pv_last += 1;
                    }
                }

                self.sel_depth = 0;

                let mut delta = Value::new(17);
                let mut alpha = -Value::INFINITE;
                let mut beta = Value::INFINITE;

                if self.root_depth >= 4 {
                    let prev = self.root_moves[self.pv_idx].previous_score;
                    alpha = (prev - delta).max(-Value::INFINITE);
                    beta = (prev + delta).min(Value::INFINITE);

                    // Dynamic contempt follows the previous score.
                    let dct = ct + (113 - ct / 2) * prev.get() / (prev.get().abs() + 147);
                    self.evaluator.set_contempt(dct);
                }

                self.failed_high_cnt = 0;
                loop {
                    let adjusted_depth =
                        (self.root_depth - self.failed_high_cnt - self.search_again_counter).max(1);
                    let root = self.root.clone();
                    let ss = self.stack.root();
                    best_value = self.search::<true>(&root, ss, alpha, beta, adjusted_depth, false);

                    // Bring the best move to the front. Sorting must be
                    // stable so that unsearched lines keep their order.
                    sort_root_moves(&mut self.root_moves[self.pv_idx..self.pv_last]);

                    if self.ctrl.stopped() {
                        break;
                    }

                    if self.is_main()
                        && multi_pv == 1
                        && (best_value <= alpha || best_value >= beta)
                        && self.ctrl.elapsed() > Duration::from_secs(3)
                    {
                        self.emit_info(self.root_depth, alpha, beta);
                    }

                    if best_value <= alpha {
                        beta = Value::new((alpha.get() + beta.get()) / 2);
                        alpha = (best_value - delta).max(-Value::INFINITE);

                        self.failed_high_cnt = 0;
                        if self.is_main() {
                            self.ctrl.set_stop_on_ponderhit(false);
                        }
                    } else if best_value >= beta {
                        beta = (best_value + delta).min(Value::INFINITE);
                        self.failed_high_cnt += 1;
                    } else {
                        break;
                    }

                    delta += Value::new(delta.get() / 4 + 5);

                    debug_assert!(alpha >= -Value::INFINITE && beta <= Value::INFINITE);
                }

                sort_root_moves(&mut self.root_moves[pv_first..self.pv_idx + 1]);

                if self.is_main()
                    && (self.ctrl.stopped()
                        || self.pv_idx + 1 == multi_pv
                        || self.ctrl.elapsed() > Duration::from_secs(3))
                {
                    self.emit_info(self.root_depth, alpha, beta);
                }

                self.pv_idx += 1;
            }

            if !self.ctrl.stopped() {
                self.completed_depth = self.root_depth;
            }

            if self.root_moves[0].head() != last_best_move {
                last_best_move = self.root_moves[0].head();
                last_best_move_depth = self.root_depth;
            }

            // Stop once a mate within the requested distance is proven.
            if let Some(mate) = limits.mate {
                if best_value >= Value::MATE_IN_MAX_PLY
                    && (Value::MATE - best_value).get() <= 2 * mate as i32
                {
                    self.ctrl.stop();
                }
            }

            if !self.is_main() {
                continue;
            }

            // With a strength handicap, pick a sub-optimal move once the
            // target depth is reached.
            if skill.enabled() && skill.time_to_pick(self.root_depth) {
                skill.pick_best(&self.root_moves, multi_pv, &mut self.rng);
            }

            if limits.use_time_management()
                && !self.ctrl.stopped()
                && !self.ctrl.stop_on_ponderhit()
            {
                let falling_eval = ((318
                    + 6 * (self.best_previous_score - best_value).get()
                    + 6 * (self.iter_value[iter_idx] - best_value).get())
                    as f64
                    / 825.0)
                    .clamp(0.5, 1.5);

                // Reduce time when the best move has been stable over many
                // iterations.
                self.time_reduction = if last_best_move_depth + 9 < self.completed_depth {
                    1.92
                } else {
                    0.95
                };

                let reduction =
                    (1.47 + self.previous_time_reduction) / (2.32 * self.time_reduction);

                tot_best_move_changes += self.ctrl.take_best_move_changes() as f64;
                let best_move_instability =
                    1.0 + 2.0 * tot_best_move_changes / self.threads as f64;

                let total_time = self.ctrl.optimum().as_secs_f64()
                    * falling_eval
                    * reduction
                    * best_move_instability;

                // A single reply deserves no deliberation.
                let total_time = if self.root_moves.len() == 1 {
                    total_time.min(0.5)
                } else {
                    total_time
                };

                if self.ctrl.elapsed().as_secs_f64() > total_time {
                    // Do not stop while pondering.
                    if self.ctrl.pondering() {
                        self.ctrl.set_stop_on_ponderhit(true);
                    } else {
                        self.ctrl.stop();
                    }
                } else if self.ctrl.increase_depth()
                    && !self.ctrl.pondering()
                    && self.ctrl.elapsed().as_secs_f64() > total_time * 0.58
                {
                    self.ctrl.set_increase_depth(false);
                } else {
                    self.ctrl.set_increase_depth(true);
                }
            }

            self.iter_value[iter_idx] = best_value;
            iter_idx = (iter_idx + 1) & 3;
        }

        if !self.is_main() {
            return;
        }

        // Swap the best PV line with the handicapped choice.
        if skill.enabled() {
            let best = skill
                .best
                .unwrap_or_else(|| skill.pick_best(&self.root_moves, multi_pv, &mut self.rng));

            if let Some(idx) = self.root_moves.iter().position(|rm| rm.head() == best) {
                self.root_moves.swap(0, idx);
            }
        }
    }

    /// Formats progress for the UCI layer, one record per PV line.
    fn emit_info(&self, depth: Depth, alpha: Value, beta: Value) {
        if self.sink.is_none() {
            return;
        }

        // The handicap searches more lines than the GUI asked for.
        let displayed = self.options.multi_pv.min(self.root_moves.len());

        let elapsed = self.ctrl.elapsed();
        let millis = elapsed.as_millis().max(1) as u64;
        let nodes = self.ctrl.nodes();
        let tb_hits = self.ctrl.tb_hits()
            + if self.root_in_tb {
                self.root_moves.len() as u64
            } else {
                0
            };

        for i in 0..displayed {
            let rm = &self.root_moves[i];
            let updated = rm.score != -Value::INFINITE;

            if depth == 1 && !updated && i > 0 {
                continue;
            }

            let d = if updated { depth } else { (depth - 1).max(1) };
            let mut v = if updated { rm.score } else { rm.previous_score };

            if v == -Value::INFINITE {
                v = Value::ZERO;
            }

            let tb = self.root_in_tb && v.get().abs() < Value::MATE_IN_MAX_PLY.get();
            if tb {
                v = rm.tb_score;
            }

            let bound = if !tb && i == self.pv_idx {
                if v >= beta {
                    Some(Bound::Lower)
                } else if v <= alpha {
                    Some(Bound::Upper)
                } else {
                    None
                }
            } else {
                None
            };

            let wdl = self
                .options
                .show_wdl
                .then(|| wdl_model(v, self.root.game_ply() as i32));

            self.send(Info {
                depth: d,
                sel_depth: rm.sel_depth,
                multipv: i + 1,
                score: v,
                bound,
                wdl,
                nodes,
                nps: nodes * 1000 / millis,
                hashfull: (elapsed > Duration::from_secs(1)).then(|| self.tt.hashfull()),
                tb_hits,
                time: elapsed,
                pv: rm.pv.clone(),
            });
        }
    }
}

/// Win/draw/loss permille from the score and game ply, per the fitted
/// win-rate model.
pub fn wdl_model(v: Value, ply: i32) -> (u32, u32, u32) {
    fn win_rate(v: Value, ply: i32) -> u32 {
        let m = ply.min(240) as f64 / 64.0;

        let a = ((-8.24404295 * m + 64.23892342) * m - 95.73056462) * m + 153.86478679;
        let b = ((-3.37154371 * m + 28.44489198) * m - 56.67657741) * m + 72.05858751;

        let x = (v.get() as f64 * 100.0 / PIECE_VALUE_EG[Role::Pawn.index()] as f64)
            .clamp(-1000.0, 1000.0);

        (0.5 + 1000.0 / (1.0 + ((a - x) / b).exp())) as u32
    }

    let w = win_rate(v, ply);
    let l = win_rate(-v, ply);
    let d = 1000 - w.min(1000) - l.min(1000);
    (w, d, l)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn futility_margin_shrinks_when_improving() {
        assert!(futility_margin(4, true) < futility_margin(4, false));
    }

    #[test]
    fn futility_move_count_grows_with_depth() {
        assert!(futility_move_count(false, 2) < futility_move_count(false, 8));
        assert!(futility_move_count(false, 5) < futility_move_count(true, 5));
    }

    #[test]
    fn excluded_key_differs_from_the_raw_key() {
        let m = Move::regular(Square::E2, Square::E4, None);
        assert_ne!(excluded_key(42, Some(m)), 42);
        assert_eq!(excluded_key(42, None), 42);
    }

    #[test]
    fn wdl_permilles_sum_to_one_thousand() {
        for (v, ply) in [(0, 0), (100, 30), (-250, 60), (1000, 120)] {
            let (w, d, l) = wdl_model(Value::new(v), ply);
            assert_eq!(w + d + l, 1000);
        }
    }

    #[test]
    fn wdl_is_symmetric() {
        let (w, _, l) = wdl_model(Value::new(150), 40);
        let (w2, _, l2) = wdl_model(Value::new(-150), 40);
        assert_eq!(w, l2);
        assert_eq!(l, w2);
    }
}
