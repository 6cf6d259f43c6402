// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Typed handles onto single attributes of an executor-backed store.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::application::store_executor::{ExecutorError, StoreHandle};
use crate::domain::attribute::AttributeKey;
use crate::domain::converter::{ConversionError, Converter, Convertible, ValueConverter};
use crate::domain::model_store::StoreError;
use crate::domain::subscription::Subscription;
use crate::domain::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// An attribute seen through a [`Converter`].
pub struct Property<T, C = ValueConverter<T>> {
    store: StoreHandle,
    key: AttributeKey,
    converter: Arc<C>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> Clone for Property<T, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key.clone(),
            converter: self.converter.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Convertible> Property<T> {
    pub fn new(store: StoreHandle, key: AttributeKey) -> Self {
        Self::with_converter(store, key, ValueConverter::new())
    }
}

impl<T, C> Property<T, C>
where
    T: Send + 'static,
    C: Converter<T> + 'static,
{
    pub fn with_converter(store: StoreHandle, key: AttributeKey, converter: C) -> Self {
        Self {
            store,
            key,
            converter: Arc::new(converter),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &AttributeKey {
        &self.key
    }

    pub async fn get(&self) -> Result<Option<T>, PropertyError> {
        let key = self.key.clone();
        let value = self
            .store
            .run(move |store| {
                store
                    .get(&key)
                    .cloned()
                    .ok_or(StoreError::UnknownAttribute(key))
            })
            .await??;
        Ok(self.converter.convert(&value)?)
    }

    /// Returns whether the attribute changed.
    pub async fn set(&self, value: T) -> Result<bool, PropertyError> {
        self.write(self.converter.convert_back(Some(&value))).await
    }

    pub async fn clear(&self) -> Result<bool, PropertyError> {
        self.write(self.converter.convert_back(None)).await
    }

    /// Listen for effective changes, converted to `T`. Values that do not
    /// convert are logged and reported as `None`.
    pub async fn on_changed<F>(&self, mut listener: F) -> Result<Subscription, PropertyError>
    where
        F: FnMut(Option<T>, Option<T>) + Send + 'static,
    {
        let key = self.key.clone();
        let converter = self.converter.clone();
        let subscription = self
            .store
            .run(move |store| {
                store.on_changed(key, move |change, _| {
                    let convert = |value: &Value| match converter.convert(value) {
                        Ok(converted) => converted,
                        Err(error) => {
                            warn!(attribute = %change.key, error = %error, "Dropping unconvertible value");
                            None
                        }
                    };
                    listener(convert(&change.old_value), convert(&change.new_value));
                })
            })
            .await?;
        Ok(subscription)
    }

    async fn write(&self, value: Value) -> Result<bool, PropertyError> {
        let key = self.key.clone();
        Ok(self.store.run(move |store| store.set(&key, value)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model_store::ModelStore;
    use crate::domain::session::Side;
    use std::sync::atomic::{AtomicI32, Ordering};

    async fn counter() -> (StoreHandle, Property<i32>) {
        let handle = StoreHandle::spawn(ModelStore::new(Side::Client));
        let id = handle
            .run(|store| store.builder("Counter").with_attribute("count", 0).create())
            .await
            .unwrap()
            .unwrap();
        let property = Property::new(handle.clone(), AttributeKey::new(id, "count"));
        (handle, property)
    }

    #[tokio::test]
    async fn test_get_and_set() {
        let (_handle, count) = counter().await;
        assert_eq!(count.get().await.unwrap(), Some(0));

        assert!(count.set(5).await.unwrap());
        assert!(!count.set(5).await.unwrap());
        assert_eq!(count.get().await.unwrap(), Some(5));

        count.clear().await.unwrap();
        assert_eq!(count.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_type_mismatch_surfaces_from_set() {
        let (handle, _count) = counter().await;
        let id = handle
            .run(|store| store.builder("Label").with_attribute("text", "a").create())
            .await
            .unwrap()
            .unwrap();
        let wrong: Property<i32> = Property::new(handle, AttributeKey::new(id, "text"));

        let err = wrong.set(1).await.unwrap_err();
        assert!(matches!(err, PropertyError::Store(StoreError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_on_changed_receives_converted_values() {
        let (_handle, count) = counter().await;
        let last = Arc::new(AtomicI32::new(-1));
        let seen = last.clone();
        let _subscription = count
            .on_changed(move |_, new| seen.store(new.unwrap_or_default(), Ordering::SeqCst))
            .await
            .unwrap();

        count.set(8).await.unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 8);
    }
}
