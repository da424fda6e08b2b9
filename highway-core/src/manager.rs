// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! The highways manager: a shared [`Plant`] plus a dynamically-sized pool of
//! [`Highway`]s, leased out least-loaded-first.
//!
//! Each lease holder tracks a load percentage; leasing adds the requested percentage to
//! the least-loaded highway, growing the pool (when auto-regulation is on and the cap
//! allows) once that would push a highway's load past 100%. Highways sort descending by
//! load, so the least-loaded one is always the list's tail.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::{HighwayConfig, HighwaysManagerConfig};
use crate::error::{ManagerError, SetupError};
use crate::highway::Highway;
use crate::plant::Plant;

struct HighwayHolder {
    highway: Arc<Highway>,
    current_load: AtomicU32,
}

impl std::fmt::Debug for HighwayHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwayHolder")
            .field("highway", &self.highway)
            .field("current_load", &self.current_load.load(Ordering::Relaxed))
            .finish()
    }
}

/// Owns one shared [`Plant`] (for fire-and-forget work that does not need a dedicated
/// thread) and a pool of single-thread [`Highway`]s leased out by load.
pub struct HighwaysManager {
    config: HighwaysManagerConfig,
    plant: Arc<Plant>,
    highways: Mutex<Vec<HighwayHolder>>,
    next_index: AtomicU32,
}

impl std::fmt::Debug for HighwaysManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwaysManager")
            .field("config", &self.config)
            .field("plant", &self.plant)
            .field("highways", &self.highways)
            .finish()
    }
}

/// A leased [`Highway`], returned by [`HighwaysManager::get_highway`]. Dropping it
/// releases the load it was charged against the manager's pool and, if auto-regulation is
/// on and that release drops the highway to zero load while the pool is above its
/// configured minimum, destroys the highway. Deref to reach the highway itself.
pub struct HighwayLease {
    highway: Arc<Highway>,
    load_percent: u32,
    manager: Weak<HighwaysManager>,
}

impl HighwayLease {
    #[must_use]
    pub fn highway(&self) -> &Arc<Highway> {
        &self.highway
    }
}

impl std::ops::Deref for HighwayLease {
    type Target = Highway;

    fn deref(&self) -> &Highway {
        &self.highway
    }
}

impl std::fmt::Debug for HighwayLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwayLease")
            .field("highway", &self.highway)
            .field("load_percent", &self.load_percent)
            .finish()
    }
}

impl Drop for HighwayLease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(&self.highway, self.load_percent);
        }
    }
}

impl HighwaysManager {
    pub fn new(config: HighwaysManagerConfig) -> Result<Arc<Self>, SetupError> {
        let plant = Plant::new(config.highway_settings.clone(), config.local_workers_count.max(1))?;

        let manager = Arc::new(Self {
            plant,
            highways: Mutex::new(Vec::new()),
            next_index: AtomicU32::new(0),
            config,
        });

        {
            let mut highways = manager
                .highways
                .lock()
                .map_err(|_| SetupError::MutexPoisoned { which: "highways" })?;
            for _ in 0..manager.config.min_highways.max(1) {
                highways.push(manager.new_holder()?);
            }
        }

        Ok(manager)
    }

    #[must_use]
    pub fn plant(&self) -> &Arc<Plant> {
        &self.plant
    }

    fn new_holder(&self) -> Result<HighwayHolder, SetupError> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let mut settings = self.config.highway_settings.clone();
        settings.name = format!("{}-{index}", self.config.highway_settings.name);
        let highway = Highway::new(settings)?;
        Ok(HighwayHolder {
            highway,
            current_load: AtomicU32::new(0),
        })
    }

    /// Leases the highway best able to absorb `expected_load_percent` more work: the
    /// least-loaded existing highway, or — if auto-regulation is on, the least-loaded
    /// highway's load plus `expected_load_percent` would exceed 100%, and the pool has not
    /// hit `max_highways` — a freshly spawned one. `expected_load_percent` is added to the
    /// chosen highway's tracked load; dropping the returned lease releases it (and, with
    /// auto-regulation on, destroys the highway if that release idles it above the
    /// configured minimum pool size).
    pub fn get_highway(self: &Arc<Self>, expected_load_percent: u32) -> Result<HighwayLease, ManagerError> {
        let highway = if self.config.auto_regulation {
            self.get_highway_with_auto_regulation(expected_load_percent)?
        } else {
            self.get_highway_no_auto_regulation(expected_load_percent)?
        };
        Ok(HighwayLease {
            highway,
            load_percent: expected_load_percent,
            manager: Arc::downgrade(self),
        })
    }

    fn get_highway_no_auto_regulation(&self, expected_load_percent: u32) -> Result<Arc<Highway>, ManagerError> {
        let mut highways = self.highways.lock().expect("highways mutex poisoned");
        sort_highways(&mut highways);
        let least_loaded = highways.last().ok_or(ManagerError::NoHighwaysAvailable)?;
        least_loaded.current_load.fetch_add(expected_load_percent, Ordering::Relaxed);
        Ok(Arc::clone(&least_loaded.highway))
    }

    fn get_highway_with_auto_regulation(&self, expected_load_percent: u32) -> Result<Arc<Highway>, ManagerError> {
        let mut highways = self.highways.lock().expect("highways mutex poisoned");
        sort_highways(&mut highways);

        let needs_growth = match highways.last() {
            Some(least_loaded) => least_loaded.current_load.load(Ordering::Relaxed) + expected_load_percent > 100,
            None => true,
        };

        if needs_growth {
            if highways.len() >= self.config.max_highways {
                return Err(ManagerError::CapacityExceeded {
                    requested: expected_load_percent,
                    max: self.config.max_highways,
                });
            }
            let holder = self.new_holder().map_err(|_| ManagerError::NoHighwaysAvailable)?;
            holder.current_load.fetch_add(expected_load_percent, Ordering::Relaxed);
            let highway = Arc::clone(&holder.highway);
            highways.push(holder);
            return Ok(highway);
        }

        let least_loaded = highways.last().ok_or(ManagerError::NoHighwaysAvailable)?;
        least_loaded.current_load.fetch_add(expected_load_percent, Ordering::Relaxed);
        Ok(Arc::clone(&least_loaded.highway))
    }

    /// Drops idle highways (`current_load == 0`) above `min_highways`, busiest-first, so a
    /// still-loaded highway is never destroyed while an idle one above the floor survives.
    /// Shrink cadence is left to the caller; this performs one pass.
    pub fn shrink_idle(&self) {
        let mut highways = self.highways.lock().expect("highways mutex poisoned");
        if highways.len() <= self.config.min_highways {
            return;
        }
        sort_highways(&mut highways);
        let keep = self.config.min_highways.max(1);
        let mut kept = Vec::with_capacity(highways.len());
        for holder in highways.drain(..) {
            if kept.len() < keep || holder.current_load.load(Ordering::Relaxed) > 0 {
                kept.push(holder);
            } else {
                holder.highway.destroy();
            }
        }
        *highways = kept;
    }

    /// Releases `load_percent` of load previously added to `highway` by a matching
    /// [`Self::get_highway`] call. A no-op if `highway` is not (or is no longer) part of
    /// this manager's pool. With auto-regulation on, a release that drops the highway to
    /// zero load while the pool is above `min_highways` destroys that highway immediately,
    /// rather than waiting for a [`Self::shrink_idle`] sweep.
    fn release(&self, highway: &Arc<Highway>, load_percent: u32) {
        let mut highways = self.highways.lock().expect("highways mutex poisoned");
        let Some(pos) = highways.iter().position(|h| Arc::ptr_eq(&h.highway, highway)) else {
            return;
        };

        let new_load = highways[pos]
            .current_load
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |load| Some(load.saturating_sub(load_percent)))
            .map(|previous| previous.saturating_sub(load_percent))
            .unwrap_or(0);

        if self.config.auto_regulation && new_load == 0 && highways.len() > self.config.min_highways.max(1) {
            let holder = highways.remove(pos);
            holder.highway.destroy();
        }
    }

    /// Destroys the shared plant and every highway in the pool. Idempotent.
    pub fn destroy(&self) {
        self.plant.destroy();
        for holder in self.highways.lock().expect("highways mutex poisoned").drain(..) {
            holder.highway.destroy();
        }
    }
}

impl Drop for HighwaysManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Descending by load, so the least-loaded highway is always `highways.last()`. Mirrors
/// `highways_manager.h`'s `sort_highways()`.
fn sort_highways(highways: &mut [HighwayHolder]) {
    highways.sort_by(|a, b| {
        b.current_load
            .load(Ordering::Relaxed)
            .cmp(&a.current_load.load(Ordering::Relaxed))
    });
}
