use ::serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::deleter::{DefaultDelete, Deleter};
use crate::linked::LinkedPtr;
use crate::refcount::Counter;
use crate::shared::SharedPtrX;

/// Serializes the managed object, or `None` when there is none.
///
/// An empty handle and a handle owning a null pointer both serialize as `None`, so the
/// distinction between the two (use count 0 against 1) does not survive a round trip.
impl<T, D, C> Serialize for SharedPtrX<T, D, C>
where
    T: ?Sized + Serialize,
    D: Deleter<T>,
    C: Counter,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.get().serialize(serializer)
    }
}

/// Serializes the managed object, or `None` when there is none.
///
/// As for [SharedPtrX], a handle owning a null pointer is indistinguishable from an empty one.
impl<T, D> Serialize for LinkedPtr<T, D>
where
    T: ?Sized + Serialize,
    D: Deleter<T>,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.get().serialize(serializer)
    }
}

/// Moves the deserialized object into a new handle; `None` gives an empty handle, never one owning
/// a null pointer.
impl<'de, T, C> Deserialize<'de> for SharedPtrX<T, DefaultDelete, C>
where
    T: ?Sized,
    Box<T>: Deserialize<'de>,
    C: Counter,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Box<T>>::deserialize(deserializer)? {
            Some(b) => unsafe { SharedPtrX::from_raw(Box::into_raw(b)) },
            None => SharedPtrX::null(),
        })
    }
}

/// Moves the deserialized object into a new ring of one; `None` gives an empty handle.
impl<'de, T> Deserialize<'de> for LinkedPtr<T, DefaultDelete>
where
    T: ?Sized,
    Box<T>: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Box<T>>::deserialize(deserializer)? {
            Some(b) => unsafe { LinkedPtr::from_raw(Box::into_raw(b)) },
            None => LinkedPtr::null(),
        })
    }
}
