//! Single-flight, abortable rescans of historical blocks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use yupost_consensus::Hash256;
use yupost_log as logging;
use yupost_primitives::hex::hash256_to_hex;
use yupost_storage::WriteBatch;

use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::wallet::Wallet;

const PROGRESS_TITLE: &str = "Rescanning...";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScanStatus {
    Success,
    Failure,
    UserAbort,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    /// Last block whose transactions were fully applied.
    pub last_scanned_block: Option<Hash256>,
    pub last_scanned_height: Option<i32>,
    /// Block that could not be read, when the scan stopped on one.
    pub last_failed_block: Option<Hash256>,
}

/// Scan bookkeeping shared between the scanning thread and observers.
#[derive(Debug, Default)]
pub struct ScanState {
    reserved: AtomicBool,
    abort: AtomicBool,
    /// Progress fraction as `f64` bits.
    progress: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl ScanState {
    fn started(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.started.lock().expect("scan state lock")
    }

    fn set_progress(&self, progress: f64) {
        let current = f64::from_bits(self.progress.load(Ordering::SeqCst));
        if progress > current {
            self.progress.store(progress.to_bits(), Ordering::SeqCst);
        }
    }
}

/// Holds the wallet's only rescan slot; released when dropped.
pub struct RescanReserver<'a> {
    wallet: &'a Wallet,
}

impl RescanReserver<'_> {
    pub fn wallet(&self) -> &Wallet {
        self.wallet
    }
}

impl Drop for RescanReserver<'_> {
    fn drop(&mut self) {
        let state = &self.wallet.scan;
        *state.started() = None;
        state.abort.store(false, Ordering::SeqCst);
        state.reserved.store(false, Ordering::SeqCst);
    }
}

impl Wallet {
    /// Claims the rescan slot, failing when another scan holds it.
    pub fn reserve_rescan(&self) -> Result<RescanReserver<'_>, WalletError> {
        if self
            .scan
            .reserved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WalletError::RescanInProgress);
        }
        self.scan.abort.store(false, Ordering::SeqCst);
        self.scan.progress.store(0f64.to_bits(), Ordering::SeqCst);
        *self.scan.started() = Some(Instant::now());
        Ok(RescanReserver { wallet: self })
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.reserved.load(Ordering::SeqCst)
    }

    pub fn is_abort_requested(&self) -> bool {
        self.scan.abort.load(Ordering::SeqCst)
    }

    /// Asks a running scan to stop after the block it is applying.
    pub fn abort_rescan(&self) {
        if self.is_scanning() {
            self.scan.abort.store(true, Ordering::SeqCst);
        }
    }

    /// Fraction of the current scan range processed, 0 when idle.
    pub fn scanning_progress(&self) -> f64 {
        if !self.is_scanning() {
            return 0.0;
        }
        f64::from_bits(self.scan.progress.load(Ordering::SeqCst))
    }

    pub fn scanning_duration(&self) -> Option<Duration> {
        self.scan.started().map(|started| started.elapsed())
    }

    fn show_progress(&self, percent: u8) {
        self.lock().emit(WalletEvent::ShowProgress {
            title: PROGRESS_TITLE.to_string(),
            percent,
        });
    }

    /// Feeds blocks `start_height..=stop_height` (the tip when `None`) through the
    /// block-connected path without moving the wallet tip. Work done before an abort or an
    /// unreadable block is kept; the result names where to resume.
    pub fn scan_for_wallet_transactions(
        &self,
        start_height: i32,
        stop_height: Option<i32>,
        reserver: &RescanReserver<'_>,
    ) -> Result<ScanResult, WalletError> {
        if !std::ptr::eq(reserver.wallet, self) {
            return Err(WalletError::InvalidData("rescan reservation belongs to another wallet"));
        }
        let tip_height = self.chain().tip()?.map_or(-1, |(height, _)| height);
        let stop = stop_height.map_or(tip_height, |stop| stop.min(tip_height));
        let mut result = ScanResult {
            status: ScanStatus::Success,
            last_scanned_block: None,
            last_scanned_height: None,
            last_failed_block: None,
        };
        let start = start_height.max(0);
        if start > stop {
            return Ok(result);
        }

        logging::log_info!("rescan started at height {start}, stopping at {stop}");
        self.show_progress(0);
        let span = f64::from(stop - start + 1);
        let mut last_percent = 0u8;
        for height in start..=stop {
            if self.is_abort_requested() {
                logging::log_info!(
                    "rescan aborted at height {height}, progress {:.2}",
                    self.scanning_progress()
                );
                result.status = ScanStatus::UserAbort;
                break;
            }
            let block = match self.chain().block_hash(height) {
                Ok(Some(hash)) => match self.chain().read_block(&hash) {
                    Ok(Some(block)) => Ok(block),
                    Ok(None) => Err(Some(hash)),
                    Err(err) => {
                        logging::log_warn!("rescan failed to read block at {height}: {err}");
                        Err(Some(hash))
                    }
                },
                // Reorganized below us; the listener will deliver the new branch.
                Ok(None) => {
                    logging::log_warn!(
                        "rescan stopped at height {height}: no longer in the active chain"
                    );
                    Err(None)
                }
                Err(err) => {
                    logging::log_warn!("rescan failed to resolve height {height}: {err}");
                    Err(None)
                }
            };
            let block = match block {
                Ok(block) => block,
                Err(failed) => {
                    result.status = ScanStatus::Failure;
                    result.last_failed_block = failed;
                    break;
                }
            };

            let hash = block.hash();
            {
                let mut guard = self.lock();
                let mut batch = WriteBatch::new();
                guard.sync_block(&block, height, &mut batch);
                guard.write(&batch)?;
            }
            result.last_scanned_block = Some(hash);
            result.last_scanned_height = Some(height);

            let progress = f64::from(height - start + 1) / span;
            self.scan.set_progress(progress);
            let percent = (progress * 100.0) as u8;
            if percent / 10 > last_percent / 10 && percent < 100 {
                logging::log_info!(
                    "rescan at height {height} ({percent}%), block {}",
                    hash256_to_hex(&hash)
                );
                self.show_progress(percent);
            }
            last_percent = percent;
        }

        {
            let mut guard = self.lock();
            guard.ledger.mark_all_dirty();
            guard.emit(WalletEvent::ShowProgress {
                title: PROGRESS_TITLE.to_string(),
                percent: 100,
            });
            guard.emit(WalletEvent::BalanceChanged);
        }
        logging::log_info!(
            "rescan finished with {:?} at {:?}",
            result.status,
            result.last_scanned_height
        );
        Ok(result)
    }

    /// Reserves the scan slot and rescans from `start_height` to the tip.
    pub fn rescan_from_height(&self, start_height: i32) -> Result<ScanResult, WalletError> {
        let reserver = self.reserve_rescan()?;
        self.scan_for_wallet_transactions(start_height, None, &reserver)
    }
}
