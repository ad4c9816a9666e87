//! Append-only probe log in internal flash.
//!
//! Uses the nRF52840's internal flash via the `sequential-storage`
//! queue: each probe report is one opaque queue element, appended
//! whole, so a reader never observes a torn record.  When the region
//! fills, the oldest records are overwritten.
//!
//! Storage layout:
//!   - Pages `LOG_FLASH_PAGE_START .. +LOG_FLASH_PAGE_COUNT`, above
//!     the application image and below the bootloader settings.
//!   - `sequential-storage` handles page rotation and erase cycles.

use defmt::{error, info};
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::queue;

use crate::config::{
    FLASH_PAGE_SIZE, LOG_FLASH_PAGE_COUNT, LOG_FLASH_PAGE_START, MAX_LOG_RECORD,
};
use crate::error::StorageError;
use crate::store::LogSink;

/// Start address of the probe-log region.
const LOG_START: u32 = LOG_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of the probe-log region.
const LOG_END: u32 = (LOG_FLASH_PAGE_START + LOG_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Flash-backed [`LogSink`].
///
/// Owns the SoftDevice flash handle; the engine loop is the only
/// writer, export is the only reader, and both go through `&mut self`.
pub struct FlashLog<F: NorFlash> {
    flash: F,
}

impl<F: NorFlash> FlashLog<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Replay every stored record, oldest first, through `emit`.
    ///
    /// Each callback receives one complete record exactly as it was
    /// appended.
    pub async fn export(&mut self, emit: &mut dyn FnMut(&[u8])) -> Result<(), StorageError> {
        let mut cache = NoCache::new();
        let mut buf = [0u8; MAX_LOG_RECORD];
        let mut it = queue::iter(&mut self.flash, LOG_START..LOG_END, &mut cache)
            .await
            .map_err(|e| {
                error!("probe log iter failed: {:?}", defmt::Debug2Format(&e));
                StorageError::Flash
            })?;
        loop {
            match it.next(&mut buf).await {
                Ok(Some(record)) => emit(&record),
                Ok(None) => break,
                Err(e) => {
                    error!("probe log read failed: {:?}", defmt::Debug2Format(&e));
                    return Err(StorageError::Flash);
                }
            }
        }
        Ok(())
    }
}

impl<F: NorFlash> LogSink for FlashLog<F> {
    async fn append(&mut self, record: &[u8]) -> Result<(), StorageError> {
        if record.len() > MAX_LOG_RECORD {
            return Err(StorageError::RecordTooLarge);
        }
        // `true`: overwrite the oldest records when the region is full.
        match queue::push(
            &mut self.flash,
            LOG_START..LOG_END,
            &mut NoCache::new(),
            record,
            true,
        )
        .await
        {
            Ok(()) => {
                info!("probe log: appended {} bytes", record.len());
                Ok(())
            }
            Err(e) => {
                error!("probe log write failed: {:?}", defmt::Debug2Format(&e));
                Err(StorageError::Flash)
            }
        }
    }
}
