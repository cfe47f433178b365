//! # Rotation Detector and Consumption Tracker
//!
//! The reader sits next to the spool and only sees the tag when it swings past
//! the antenna, once per revolution. Each poll reports either a UID or nothing,
//! and "nothing" is ambiguous: the tag may be on the far side of the spool or
//! the spool may have been taken away.
//!
//! ## States
//! - `Idle`: no usable spool
//! - `Tracking`: a spool document is loaded for `uid`
//!
//! ## Rules
//! 1. A new UID is read from the tag and validated. Success starts tracking
//!    unconfirmed; any failure drops back to `Idle`.
//! 2. The same UID again refreshes `last_seen` and confirms the sighting.
//! 3. No UID while tracking:
//!    - confirmed and absent for at least the threshold: charge one revolution,
//!      write the document back, and clear `confirmed`
//!    - absent for `reset_factor` times the threshold: forget the spool
//!
//! Clearing `confirmed` after each step means one absence can never be counted
//! twice; the tag has to come round again first.

use crate::config::Config;
use crate::spool::{self, Consumption, SpoolState, ValidationError};
use crate::tag_store::{self, PageIo, StoreError, TagPayload};
use crate::Uid;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A spool currently being tracked.
#[derive(Clone, Debug, PartialEq)]
pub struct Tracking {
    pub uid: Uid,
    pub spool: SpoolState,
    /// Poll time (ms) of the most recent sighting
    pub last_seen_ms: u64,
    /// Seen on at least two polls since load or since the last charged revolution
    pub confirmed: bool,
    /// In-memory document is ahead of the tag because a write failed
    pub unsaved: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrackerState {
    Idle,
    Tracking(Tracking),
}

/// Why a newly seen tag could not be tracked.
#[derive(Error, Debug)]
pub enum Rejection {
    /// Tag holds no spool document
    #[error("tag has no filament data")]
    Blank,

    /// Reading or decoding the document failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document decoded but does not describe a usable spool
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// What a single poll did.
#[derive(Debug)]
pub enum TrackerEvent {
    /// Nothing changed worth reporting
    Quiet,
    /// A new spool was loaded
    Loaded { uid: Uid },
    /// A new tag could not be used
    Rejected { uid: Uid, reason: Rejection },
    /// The tracked tag came round again and is armed for the next absence
    Confirmed { uid: Uid },
    /// One revolution was charged
    Consumed {
        uid: Uid,
        step: Consumption,
        persisted: bool,
    },
    /// The spool was gone long enough to be forgotten
    Reset { uid: Uid },
}

/// Turns per-poll tag sightings into consumption steps.
pub struct ConsumptionTracker {
    state: TrackerState,
    start_page: u16,
    max_read_pages: u16,
    absence_threshold_ms: u64,
    reset_after_ms: u64,
    last_rejected: Option<Uid>,
}

impl ConsumptionTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            state: TrackerState::Idle,
            start_page: config.tag.start_page,
            max_read_pages: config.tag.max_read_pages,
            absence_threshold_ms: config.tracker.absence_threshold_ms,
            reset_after_ms: config.tracker.reset_after_ms(),
            last_rejected: None,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// The spool being tracked, if any.
    pub fn active(&self) -> Option<&Tracking> {
        match &self.state {
            TrackerState::Tracking(tracking) => Some(tracking),
            TrackerState::Idle => None,
        }
    }

    /// Advance the state machine with the result of one scan taken at `now_ms`.
    ///
    /// `tag` is used to load a newly seen spool and to persist each charged
    /// revolution.
    pub fn step<T: PageIo + ?Sized>(
        &mut self,
        tag: &mut T,
        seen: Option<&Uid>,
        now_ms: u64,
    ) -> TrackerEvent {
        match seen {
            Some(uid) => self.on_sighting(tag, uid, now_ms),
            None => self.on_absence(tag, now_ms),
        }
    }

    fn on_sighting<T: PageIo + ?Sized>(&mut self, tag: &mut T, uid: &Uid, now_ms: u64) -> TrackerEvent {
        if let TrackerState::Tracking(tracking) = &mut self.state {
            if &tracking.uid == uid {
                tracking.last_seen_ms = now_ms;
                if tracking.confirmed {
                    return TrackerEvent::Quiet;
                }
                tracking.confirmed = true;
                debug!(%uid, "tag confirmed");
                return TrackerEvent::Confirmed { uid: uid.clone() };
            }
        }

        self.state = TrackerState::Idle;
        match self.load(tag) {
            Ok(spool) => {
                info!(
                    %uid,
                    brand = spool.document.brand.as_deref().unwrap_or("-"),
                    material = spool.document.material_type.as_deref().unwrap_or("-"),
                    grams_remaining = spool.document.grams_remaining,
                    meters_remaining = spool.document.meters_remaining,
                    "loaded filament tag"
                );
                self.last_rejected = None;
                self.state = TrackerState::Tracking(Tracking {
                    uid: uid.clone(),
                    spool,
                    last_seen_ms: now_ms,
                    confirmed: false,
                    unsaved: false,
                });
                TrackerEvent::Loaded { uid: uid.clone() }
            }
            Err(reason) => {
                // A blank tag parked on the reader would otherwise log every poll
                if self.last_rejected.as_ref() == Some(uid) {
                    debug!(%uid, %reason, "tag still unusable");
                } else {
                    warn!(%uid, %reason, "ignoring tag");
                    self.last_rejected = Some(uid.clone());
                }
                TrackerEvent::Rejected {
                    uid: uid.clone(),
                    reason,
                }
            }
        }
    }

    fn on_absence<T: PageIo + ?Sized>(&mut self, tag: &mut T, now_ms: u64) -> TrackerEvent {
        let start_page = self.start_page;
        let TrackerState::Tracking(tracking) = &mut self.state else {
            return TrackerEvent::Quiet;
        };
        let gap = now_ms.saturating_sub(tracking.last_seen_ms);

        if tracking.confirmed && gap >= self.absence_threshold_ms {
            tracking.confirmed = false;
            let Some(step) = spool::consume_rotation(&mut tracking.spool) else {
                return TrackerEvent::Quiet;
            };

            let doc = &tracking.spool.document;
            let payload = TagPayload::from(doc);
            let persisted = match tag_store::write_document(tag, &payload, start_page) {
                Ok(pages) => {
                    tracking.unsaved = false;
                    info!(
                        uid = %tracking.uid,
                        meters = format_args!("{:.3}", step.meters),
                        grams = format_args!("{:.3}", step.grams),
                        meters_remaining = doc.meters_remaining,
                        grams_remaining = doc.grams_remaining,
                        pages,
                        "rotation consumed"
                    );
                    true
                }
                Err(err) => {
                    tracking.unsaved = true;
                    warn!(
                        uid = %tracking.uid,
                        error = %err,
                        meters_remaining = doc.meters_remaining,
                        "failed to update tag, keeping values in memory"
                    );
                    false
                }
            };
            TrackerEvent::Consumed {
                uid: tracking.uid.clone(),
                step,
                persisted,
            }
        } else if gap >= self.reset_after_ms {
            let uid = tracking.uid.clone();
            if tracking.unsaved {
                warn!(%uid, "forgetting spool with unsaved consumption");
            }
            info!(%uid, gap_ms = gap, "tag gone, resetting");
            self.state = TrackerState::Idle;
            TrackerEvent::Reset { uid }
        } else {
            TrackerEvent::Quiet
        }
    }

    fn load<T: PageIo + ?Sized>(&self, tag: &mut T) -> Result<SpoolState, Rejection> {
        let payload = tag_store::read_document(tag, self.start_page, self.max_read_pages)?
            .ok_or(Rejection::Blank)?;
        Ok(spool::normalise(&payload)?)
    }
}
