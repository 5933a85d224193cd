mod result_serializer;

pub use result_serializer::{ResultSerializer, SerializedRow};
