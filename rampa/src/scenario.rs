use std::marker::PhantomData;

use typed_builder::TypedBuilder;

use crate::{error::IterationError, metrics::MetricsSink};

/// What to run: a named iteration and the sink it reports into.
///
/// The iteration is any `Fn() -> impl Future<Output = Result<(), IterationError>>`.
/// It receives nothing from the engine; whatever it needs (an
/// [`HttpExecutor`](crate::http::HttpExecutor), checks, the metrics sink) is
/// captured when the closure is built.
///
/// ```rust
/// use rampa::{IterationError, MetricsSink, Scenario};
///
/// let metrics = MetricsSink::new();
/// let scenario = Scenario::builder()
///     .name("noop")
///     .iteration(|| async { Ok::<(), IterationError>(()) })
///     .metrics(metrics.clone())
///     .build();
/// assert_eq!(scenario.name, "noop");
/// ```
#[derive(TypedBuilder)]
pub struct Scenario<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send + 'static,
{
    #[builder(setter(into))]
    pub name: String,
    pub iteration: F,
    #[builder(default)]
    pub metrics: MetricsSink,
    #[builder(default, setter(skip))]
    future: PhantomData<fn() -> Fut>,
}
