use crate::metrics::Metrics;

pub trait Logger {
    fn train(&mut self, msg: &Metrics);
    fn eval(&mut self, msg: &Metrics);
    fn info(&mut self, msg: &str);
}

#[derive(Debug, Default, Clone)]
pub struct TracingLogger {
    pub tag: String,
}

impl TracingLogger {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl Logger for TracingLogger {
    fn train(&mut self, msg: &Metrics) {
        tracing::info!(target: "rlx::train", tag = %self.tag, "{msg}");
    }

    fn eval(&mut self, msg: &Metrics) {
        tracing::info!(target: "rlx::eval", tag = %self.tag, "{msg}");
    }

    fn info(&mut self, msg: &str) {
        tracing::info!(target: "rlx::info", tag = %self.tag, "{msg}");
    }
}

impl<L: Logger + ?Sized> Logger for Box<L> {
    fn train(&mut self, msg: &Metrics) {
        (**self).train(msg)
    }

    fn eval(&mut self, msg: &Metrics) {
        (**self).eval(msg)
    }

    fn info(&mut self, msg: &str) {
        (**self).info(msg)
    }
}
