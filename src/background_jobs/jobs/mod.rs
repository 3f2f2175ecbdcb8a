mod garbage_collection;
mod swift_feed;

pub use garbage_collection::GarbageCollectionJob;
pub use swift_feed::SwiftFeedJob;
