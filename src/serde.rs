use crate::{
    computed::Computed,
    signal::Signal,
    traits::SignalWith,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

impl<T: Serialize + 'static> Serialize for Signal<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.try_with(|value| value.serialize(serializer))
            .unwrap_or_else(|| {
                Err(serde::ser::Error::custom(
                    "tried to serialize a signal that has been disposed",
                ))
            })
    }
}

impl<'de, T: Deserialize<'de> + 'static> Deserialize<'de> for Signal<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Signal::new)
    }
}

impl<T: Serialize + 'static> Serialize for Computed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.try_with(|value| value.serialize(serializer))
            .unwrap_or_else(|| {
                Err(serde::ser::Error::custom(
                    "tried to serialize a computed that has been disposed",
                ))
            })
    }
}
