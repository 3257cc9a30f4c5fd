//! Pipeline orchestration: drain a processor into a loader

use super::{Loader, Processor};
use eyre::{Context, Result};

const DEFAULT_BATCH_SIZE: usize = 1000;

/// Pulls rows from the outermost [`Processor`] and hands them to a
/// [`Loader`] in batches
///
/// # Example
/// ```no_run
/// use etl_transforms::etl::{Pipeline, Processor};
/// use etl_transforms::storage::NdjsonWriter;
///
/// # async fn example() -> eyre::Result<()> {
/// let processor = Processor::memory("numbers", vec![]);
/// let loader = NdjsonWriter::create("out.ndjson")?;
///
/// let count = Pipeline::new(processor, loader).run().await?;
/// println!("Processed {} rows", count);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<L> {
    processor: Processor,
    loader: L,
    batch_size: usize,
}

impl<L: Loader> Pipeline<L> {
    /// Create a new pipeline
    pub fn new(processor: Processor, loader: L) -> Self {
        Self {
            processor,
            loader,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the pipeline until the processor is exhausted
    ///
    /// Returns the number of rows successfully loaded. The processor is
    /// closed afterwards, also when a stage fails.
    ///
    /// # Errors
    /// Returns an error if pulling or loading fails
    pub async fn run(mut self) -> Result<usize> {
        log::info!("Starting pipeline for {}", self.processor.name());
        let result = self.drain().await;
        self.processor.close();
        let count = result?;
        if count == 0 {
            log::warn!("No rows produced by {}", self.processor.name());
        } else {
            log::info!("Loaded {} rows", count);
        }
        Ok(count)
    }

    async fn drain(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut batch = Vec::with_capacity(self.batch_size);
        while let Some(row) = self
            .processor
            .next()
            .wrap_err_with(|| format!("Failed to read from {}", self.processor.name()))?
        {
            batch.push(row);
            if batch.len() >= self.batch_size {
                log::debug!("Loading batch of {} rows", batch.len());
                count += self.loader.load(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            log::debug!("Loading batch of {} rows", batch.len());
            count += self.loader.load(batch).await?;
        }
        Ok(count)
    }
}
