use crate::chess::Position;
use crate::search::Limits;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

/// Shared search control.
///
/// One per `go`; all workers cooperate through this object and nothing else
/// besides the transposition table and the breadcrumbs.
#[derive(Debug)]
pub struct Control {
    limits: Limits,
    timestamp: Instant,
    optimum: Duration,
    maximum: Duration,
    stop: AtomicBool,
    ponder: AtomicBool,
    stop_on_ponderhit: AtomicBool,
    increase_depth: AtomicBool,
    nodes: AtomicU64,
    tb_hits: AtomicU64,
    best_move_changes: AtomicU64,
}

impl Control {
    /// Sets up the controller for a new search.
    pub fn new(pos: &Position, limits: Limits, move_overhead: Duration) -> Self {
        let (optimum, maximum) = Self::time_to_search(pos, &limits, move_overhead);

        Control {
            ponder: AtomicBool::new(limits.ponder),
            limits,
            timestamp: Instant::now(),
            optimum,
            maximum,
            stop: AtomicBool::new(false),
            stop_on_ponderhit: AtomicBool::new(false),
            increase_depth: AtomicBool::new(true),
            nodes: AtomicU64::new(0),
            tb_hits: AtomicU64::new(0),
            best_move_changes: AtomicU64::new(0),
        }
    }

    fn time_to_search(
        pos: &Position,
        limits: &Limits,
        move_overhead: Duration,
    ) -> (Duration, Duration) {
        let Some((clock, inc)) = limits.clock else {
            let time = limits.movetime.unwrap_or(Duration::MAX);
            return (time, time);
        };

        let clock = clock.saturating_sub(move_overhead);
        let moves_left = match limits.movestogo {
            Some(mtg) => mtg.clamp(1, 50),
            None => 225 / pos.fullmoves().min(75),
        };

        let time_per_move = inc.saturating_add(clock / moves_left);
        (time_per_move / 2, (clock / 2).max(Duration::from_millis(1)))
    }

    /// The search limits.
    #[inline(always)]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The time elapsed so far.
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Instant::now()
            .saturating_duration_since(self.timestamp)
            .max(Duration::from_nanos(1))
    }

    /// The soft time bound for starting another iteration.
    #[inline(always)]
    pub fn optimum(&self) -> Duration {
        self.optimum
    }

    /// The hard time bound.
    #[inline(always)]
    pub fn maximum(&self) -> Duration {
        self.maximum
    }

    /// The nodes counted so far across all workers.
    #[inline(always)]
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Relaxed)
    }

    /// Counts searched nodes.
    #[inline(always)]
    pub fn count_nodes(&self, count: u64) {
        self.nodes.fetch_add(count, Relaxed);
    }

    /// The tablebase hits counted so far across all workers.
    #[inline(always)]
    pub fn tb_hits(&self) -> u64 {
        self.tb_hits.load(Relaxed)
    }

    /// Counts tablebase hits.
    #[inline(always)]
    pub fn count_tb_hit(&self) {
        self.tb_hits.fetch_add(1, Relaxed);
    }

    /// Whether the search has been told to stop.
    #[inline(always)]
    pub fn stopped(&self) -> bool {
        self.stop.load(Relaxed)
    }

    /// Interrupts the ongoing search.
    #[inline(always)]
    pub fn stop(&self) {
        self.stop.store(true, Relaxed);
    }

    /// Whether the search is pondering.
    #[inline(always)]
    pub fn pondering(&self) -> bool {
        self.ponder.load(Relaxed)
    }

    /// Switches from pondering to normal search.
    #[inline(always)]
    pub fn ponderhit(&self) {
        self.ponder.store(false, Relaxed);
        if self.stop_on_ponderhit.load(Relaxed) {
            self.stop();
        }
    }

    #[inline(always)]
    pub fn stop_on_ponderhit(&self) -> bool {
        self.stop_on_ponderhit.load(Relaxed)
    }

    #[inline(always)]
    pub fn set_stop_on_ponderhit(&self, value: bool) {
        self.stop_on_ponderhit.store(value, Relaxed);
    }

    /// Whether workers should deepen rather than re-search.
    #[inline(always)]
    pub fn increase_depth(&self) -> bool {
        self.increase_depth.load(Relaxed)
    }

    #[inline(always)]
    pub fn set_increase_depth(&self, value: bool) {
        self.increase_depth.store(value, Relaxed);
    }

    /// Records that a worker's best root move changed this iteration.
    ///
    /// Feeds the instability term of the time manager.
    #[inline(always)]
    pub fn count_best_move_change(&self) {
        self.best_move_changes.fetch_add(1, Relaxed);
    }

    /// Drains the accumulated best-move changes.
    #[inline(always)]
    pub fn take_best_move_changes(&self) -> u64 {
        self.best_move_changes.swap(0, Relaxed)
    }

    /// Periodic clock and node check, run by the main worker.
    ///
    /// `calls` counts down between checks so that the clock is only
    /// consulted about once every thousand nodes, or often enough to honor
    /// a node limit to within 0.1%.
    pub fn check_time(&self, calls: &mut i64) {
        *calls -= 1;
        if *calls > 0 {
            return;
        }

        *calls = match self.limits.nodes {
            Some(nodes) => 1024.min((nodes / 1024) as i64).max(1),
            None => 1024,
        };

        if self.pondering() {
            return;
        }

        let elapsed = self.elapsed();
        let out_of_time = self.limits.use_time_management()
            && (elapsed + Duration::from_millis(10) > self.maximum || self.stop_on_ponderhit());
        let out_of_movetime = self.limits.movetime.is_some_and(|t| elapsed >= t);
        let out_of_nodes = self.limits.nodes.is_some_and(|n| self.nodes() >= n);

        if out_of_time || out_of_movetime || out_of_nodes {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(limits: Limits) -> Control {
        Control::new(&Position::default(), limits, Duration::from_millis(10))
    }

    #[test]
    fn elapsed_is_always_positive() {
        let ctrl = control(Limits::none());
        assert!(ctrl.elapsed() > Duration::ZERO);
    }

    #[test]
    fn node_limit_raises_stop() {
        let ctrl = control(Limits::nodes(0));
        let mut calls = 1i64;
        ctrl.count_nodes(1);
        ctrl.check_time(&mut calls);
        assert!(ctrl.stopped());
    }

    #[test]
    fn movetime_raises_stop() {
        let ctrl = control(Limits::movetime(Duration::ZERO));
        let mut calls = 1i64;
        std::thread::sleep(Duration::from_millis(1));
        ctrl.check_time(&mut calls);
        assert!(ctrl.stopped());
    }

    #[test]
    fn pondering_suppresses_the_clock() {
        let limits = Limits {
            movetime: Some(Duration::ZERO),
            ponder: true,
            ..Limits::default()
        };

        let ctrl = control(limits);
        let mut calls = 1i64;
        ctrl.check_time(&mut calls);
        assert!(!ctrl.stopped());

        ctrl.ponderhit();
        let mut calls = 1i64;
        ctrl.check_time(&mut calls);
        assert!(ctrl.stopped());
    }

    #[test]
    fn stop_is_sticky() {
        let ctrl = control(Limits::none());
        assert!(!ctrl.stopped());
        ctrl.stop();
        assert!(ctrl.stopped());
    }

    #[test]
    fn ponderhit_stops_if_time_already_exceeded() {
        let ctrl = control(Limits {
            ponder: true,
            ..Limits::default()
        });

        ctrl.set_stop_on_ponderhit(true);
        ctrl.ponderhit();
        assert!(ctrl.stopped());
    }
}
