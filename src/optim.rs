//! Adam with an exponentially decaying learning rate
use crate::TsFloat;
use ndarray::{ArrayD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

/// Learning rate as a function of the optimizer step.
pub trait LRScheduler {
    fn get_lr(&self, step: u64) -> TsFloat;
}

/// lr = lr_initial * decay_rate ^ (step / decay_steps)
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExponentialDecay {
    pub lr_initial: TsFloat,
    pub decay_steps: u64,
    pub decay_rate: TsFloat,
    pub staircase: bool,
}

impl ExponentialDecay {
    pub const fn constant(lr: TsFloat) -> Self {
        Self {
            lr_initial: lr,
            decay_steps: 1,
            decay_rate: 1.,
            staircase: false,
        }
    }
}

impl LRScheduler for ExponentialDecay {
    fn get_lr(&self, step: u64) -> TsFloat {
        if self.decay_steps == 0 {
            return self.lr_initial;
        }
        let mut exponent = step as TsFloat / self.decay_steps as TsFloat;
        if self.staircase {
            exponent = exponent.floor();
        }
        self.lr_initial * self.decay_rate.powf(exponent)
    }
}

/// Adam optimizer
///
/// m_t = β1 m + (1 - β1) g, v_t = β2 v + (1 - β2) g², θ -= lr_t m_t / (√v_t + ε)
/// with lr_t = lr √(1 - β2^t) / (1 - β1^t).
pub struct Adam<S: LRScheduler> {
    schedule: S,
    beta1: TsFloat,
    beta2: TsFloat,
    epsilon: TsFloat,
    t: u64,
    m: Vec<ArrayD<TsFloat>>,
    v: Vec<ArrayD<TsFloat>>,
}

impl<S: LRScheduler> Adam<S> {
    pub fn new(schedule: S) -> Self {
        Self {
            schedule,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Learning rate that the next update will use.
    pub fn current_lr(&self) -> TsFloat {
        self.schedule.get_lr(self.t)
    }

    /// Apply one update. `grads[i]` must have the shape of `params[i]`.
    ///
    /// # Panics
    /// If the number of parameters changes between calls or shapes disagree
    pub fn step(&mut self, params: Vec<ArrayViewMutD<TsFloat>>, grads: &[ArrayD<TsFloat>]) {
        assert_eq!(params.len(), grads.len());
        if self.m.is_empty() {
            self.m = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.v = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
        }
        assert_eq!(self.m.len(), grads.len());

        let lr = self.current_lr();
        self.t += 1;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let lr_t = lr * (1. - self.beta2.powi(t)).sqrt() / (1. - self.beta1.powi(t));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (((param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1. - beta1) * g;
                    *v = beta2 * *v + (1. - beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + epsilon);
                });
        }
    }
}
