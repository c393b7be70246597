use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{BoxError, ConfigError, Error};
use crate::util::{read_unpoisoned, write_unpoisoned};

type RenderFn = dyn Fn() -> Result<String, BoxError> + Send + Sync;

/// Caller-owned mutable text that requests read at render time.
///
/// Clones share the same slot: `set` on any of them is observed by every
/// request holding the binding.
#[derive(Clone, Default)]
pub struct Binding(Arc<RwLock<String>>);

impl Binding {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(value.into())))
    }

    pub fn set(&self, value: impl Into<String>) {
        *write_unpoisoned(&self.0) = value.into();
    }

    pub fn get(&self) -> String {
        read_unpoisoned(&self.0).clone()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("Binding").field(&"<bound>").finish()
    }
}

/// Text whose value is produced when a request is rendered, not when it is configured.
#[derive(Clone)]
pub enum Lazy {
    Text(Arc<str>),
    Bound(Binding),
    Computed(Arc<RenderFn>),
}

impl Lazy {
    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Self::Text(value.into())
    }

    pub fn bound(binding: &Binding) -> Self {
        Self::Bound(binding.clone())
    }

    pub fn from_fn<F>(render: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(move || Ok::<String, BoxError>(render())))
    }

    pub fn try_from_fn<F, E>(render: F) -> Self
    where
        F: Fn() -> Result<String, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Computed(Arc::new(move || -> Result<String, BoxError> {
            render().map_err(Into::into)
        }))
    }

    pub fn render(&self) -> Result<String, Error> {
        match self {
            Self::Text(text) => Ok(text.to_string()),
            Self::Bound(binding) => Ok(binding.get()),
            Self::Computed(render) => render().map_err(|source| Error::Render { source }),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::Text(Arc::from(""))
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => formatter.debug_tuple("Text").field(text).finish(),
            Self::Bound(binding) => formatter.debug_tuple("Bound").field(binding).finish(),
            Self::Computed(_) => formatter.write_str("Computed(..)"),
        }
    }
}

/// Conversion accepted by every value-taking [`Request`](crate::Request) setter.
///
/// Text, bindings, lazies and `Fn() -> String` closures convert; numeric and
/// boolean scalars are rejected so an accidental non-text argument becomes a
/// configuration error instead of a silently formatted value.
pub trait IntoLazy {
    fn into_lazy(self) -> Result<Lazy, ConfigError>;
}

impl IntoLazy for Lazy {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(self)
    }
}

impl IntoLazy for &str {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::text(self))
    }
}

impl IntoLazy for String {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::text(self))
    }
}

impl IntoLazy for &String {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::text(self.as_str()))
    }
}

impl IntoLazy for Arc<str> {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::Text(self))
    }
}

impl IntoLazy for Binding {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::Bound(self))
    }
}

impl IntoLazy for &Binding {
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::bound(self))
    }
}

impl<F> IntoLazy for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn into_lazy(self) -> Result<Lazy, ConfigError> {
        Ok(Lazy::from_fn(self))
    }
}

macro_rules! reject_scalars {
    ($($scalar:ty),* $(,)?) => {
        $(
            impl IntoLazy for $scalar {
                fn into_lazy(self) -> Result<Lazy, ConfigError> {
                    Err(ConfigError::NotRenderable {
                        value: self.to_string(),
                    })
                }
            }
        )*
    };
}

reject_scalars!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool,
);
