//! Hot flows: a radio that plays whether or not anyone listens, and state
//! holders that only announce real changes.
//!
//! Run with: cargo run --bin complete_15_hot_flows

use futures::stream::{BoxStream, StreamExt};
use playground::log::{self, log};
use playground::{Flow, Job, PlaygroundConfig, SharedFlow, StateCell, TaskScope};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::time::sleep;

// =============================================================================
// Milestone 1: SharedFlow (no replay)
// =============================================================================

pub type Song = String;

#[derive(Clone)]
pub struct RadioStation {
    broadcast: SharedFlow<Song>,
}

impl RadioStation {
    pub fn new() -> Self {
        Self {
            broadcast: SharedFlow::new(16),
        }
    }

    /// Keeps the last `replay` songs for listeners who tune in late.
    pub fn with_replay(replay: usize) -> Self {
        Self {
            broadcast: SharedFlow::with_replay(16, replay),
        }
    }

    /// Returns how many listeners heard it.
    pub fn play(&self, song: impl Into<Song>) -> usize {
        let song = song.into();
        let listeners = self.broadcast.emit(song.clone());
        log(format!("on air: {song} ({listeners} listening)"));
        listeners
    }

    pub fn tune_in(&self) -> BoxStream<'static, Song> {
        self.broadcast.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.broadcast.subscriber_count()
    }

    /// Play a cold playlist on air from inside `scope`.
    pub fn broadcast_playlist(&self, scope: &TaskScope, playlist: &Flow<Song>) -> Job {
        playlist.share_in(scope, &self.broadcast)
    }
}

impl Default for RadioStation {
    fn default() -> Self {
        Self::new()
    }
}

/// Listen inside `scope` and record every song heard until the scope is
/// cancelled or the station goes off air.
pub fn spawn_listener(scope: &TaskScope, station: &RadioStation, heard: Arc<Mutex<Vec<Song>>>) {
    let mut songs = station.tune_in();
    scope.launch(async move {
        while let Some(song) = songs.next().await {
            heard.lock().unwrap_or_else(|p| p.into_inner()).push(song);
        }
        Ok(())
    });
}

// =============================================================================
// Milestone 2: StateCell with atomic updates
// =============================================================================

#[derive(Clone)]
pub struct ViewCounter {
    views: StateCell<u64>,
}

impl ViewCounter {
    pub fn new() -> Self {
        Self {
            views: StateCell::new(0),
        }
    }

    /// Safe under concurrent callers; no view is ever lost.
    pub fn record_view(&self) -> u64 {
        self.views.update(|views| views + 1)
    }

    pub fn views(&self) -> u64 {
        self.views.value()
    }

    pub fn watch(&self) -> BoxStream<'static, u64> {
        self.views.subscribe()
    }
}

impl Default for ViewCounter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Milestone 3: Distinct-until-changed selection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct DirectionSelector {
    selected: StateCell<Direction>,
}

impl DirectionSelector {
    pub fn new(initial: Direction) -> Self {
        Self {
            selected: StateCell::new(initial),
        }
    }

    /// Returns whether watchers were notified.
    pub fn select(&self, direction: Direction) -> bool {
        self.selected.set(direction)
    }

    pub fn selected(&self) -> Direction {
        self.selected.value()
    }

    pub fn watch(&self) -> BoxStream<'static, Direction> {
        self.selected.subscribe()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PlaygroundConfig::load()?;
    log::init(&config.logging);

    println!("=== Radio station ===");
    let station = RadioStation::new();
    station.play("Intro jingle");

    let scope = TaskScope::new();
    let early = Arc::new(Mutex::new(Vec::new()));
    spawn_listener(&scope, &station, early.clone());
    station.play("Morning news");
    sleep(config.millis(50)).await;

    let late = Arc::new(Mutex::new(Vec::new()));
    spawn_listener(&scope, &station, late.clone());
    let playlist = Flow::from_iter(vec!["Song A".to_string(), "Song B".to_string()]);
    station.broadcast_playlist(&scope, &playlist).join().await?;
    sleep(config.millis(50)).await;
    scope.cancel();

    log(format!("early listener heard {:?}", early.lock().unwrap_or_else(|p| p.into_inner())));
    log(format!("late listener heard {:?}", late.lock().unwrap_or_else(|p| p.into_inner())));

    println!("\n=== View counter ===");
    let counter = ViewCounter::new();
    let viewers: Vec<_> = (0..500)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                counter.record_view();
            })
        })
        .collect();
    for viewer in viewers {
        viewer.await?;
    }
    log(format!("views after 500 concurrent viewers: {}", counter.views()));

    println!("\n=== Direction selector ===");
    let selector = DirectionSelector::new(Direction::North);
    let mut changes = selector.watch();
    let watcher = tokio::spawn(async move {
        while let Some(direction) = changes.next().await {
            log(format!("heading {direction}"));
        }
    });
    for direction in [Direction::East, Direction::East, Direction::South, Direction::South] {
        let notified = selector.select(direction);
        log(format!("select {direction}: notified = {notified}"));
        sleep(config.millis(20)).await;
    }
    drop(selector);
    watcher.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn heard(sink: &Arc<Mutex<Vec<Song>>>) -> Vec<Song> {
        sink.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_listener_misses_earlier_songs() {
        let station = RadioStation::new();
        assert_eq!(station.play("nobody hears this"), 0);

        let scope = TaskScope::new();
        let early = Arc::new(Mutex::new(Vec::new()));
        spawn_listener(&scope, &station, early.clone());
        assert_eq!(station.play("one"), 1);
        assert_eq!(station.play("two"), 1);
        sleep(Duration::from_millis(10)).await;

        let late = Arc::new(Mutex::new(Vec::new()));
        spawn_listener(&scope, &station, late.clone());
        assert_eq!(station.play("three"), 2);
        sleep(Duration::from_millis(10)).await;
        scope.cancel();

        assert_eq!(heard(&early), vec!["one", "two", "three"]);
        assert_eq!(heard(&late), vec!["three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_lets_late_listener_catch_up() {
        let station = RadioStation::with_replay(1);
        station.play("one");
        station.play("two");

        let mut late = station.tune_in();
        station.play("three");
        assert_eq!(late.next().await.as_deref(), Some("two"));
        assert_eq!(late.next().await.as_deref(), Some("three"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_is_shared_in_scope() {
        let station = RadioStation::new();
        let scope = TaskScope::new();
        let mut listener = station.tune_in();
        assert_eq!(station.listeners(), 1);

        let playlist = Flow::from_iter(vec!["a".to_string(), "b".to_string()]);
        station.broadcast_playlist(&scope, &playlist).join().await.unwrap();
        assert_eq!(listener.next().await.as_deref(), Some("a"));
        assert_eq!(listener.next().await.as_deref(), Some("b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_views_are_not_lost() {
        let counter = ViewCounter::new();
        let viewers: Vec<_> = (0..2_000)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    counter.record_view();
                })
            })
            .collect();
        for viewer in viewers {
            viewer.await.unwrap();
        }
        assert_eq!(counter.views(), 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_watchers_see_latest_count() {
        let counter = ViewCounter::new();
        let mut updates = counter.watch();
        assert_eq!(updates.next().await, Some(0));
        assert_eq!(counter.record_view(), 1);
        assert_eq!(counter.record_view(), 2);
        assert_eq!(updates.next().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselecting_direction_notifies_nobody() {
        let selector = DirectionSelector::new(Direction::North);
        let mut changes = selector.watch();
        assert_eq!(changes.next().await, Some(Direction::North));

        assert!(!selector.select(Direction::North));
        assert!(timeout(Duration::from_millis(50), changes.next()).await.is_err());

        assert!(selector.select(Direction::West));
        assert!(!selector.select(Direction::West));
        assert_eq!(changes.next().await, Some(Direction::West));
        assert!(timeout(Duration::from_millis(50), changes.next()).await.is_err());
        assert_eq!(selector.selected(), Direction::West);
        assert_eq!(Direction::West.to_string(), "west");
    }
}
