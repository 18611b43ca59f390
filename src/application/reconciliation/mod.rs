mod reconciler;

pub use reconciler::Reconciler;
