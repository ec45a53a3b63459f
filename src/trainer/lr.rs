/// Learning rate of a training run.
///
/// The epoch scheduler anneals the base rate; per-window rescaling goes through
/// [`LearningRateContext::scoped`], whose guard puts the base rate back on drop.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateContext {
    rate: f64,
}

impl LearningRateContext {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn anneal(&mut self, factor: f64) {
        self.rate /= factor;
    }

    /// Sets the rate to `base * scale` until the returned guard is dropped.
    pub fn scoped(&mut self, scale: f64) -> ScopedLearningRate<'_> {
        let base = self.rate;
        self.rate = base * scale;
        ScopedLearningRate { context: self, base }
    }
}

#[derive(Debug)]
pub struct ScopedLearningRate<'a> {
    context: &'a mut LearningRateContext,
    base: f64,
}

impl ScopedLearningRate<'_> {
    pub fn rate(&self) -> f64 {
        self.context.rate
    }

    pub fn base(&self) -> f64 {
        self.base
    }
}

impl Drop for ScopedLearningRate<'_> {
    fn drop(&mut self) {
        self.context.rate = self.base;
    }
}
