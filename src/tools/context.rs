//! Per-invocation execution context and its single-assignment result slot

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::tools::output::ToolOutput;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("result was already written")]
    AlreadyCompleted,
    #[error("result slot was abandoned without a value")]
    Abandoned,
    #[error("result reader is gone")]
    ReaderDropped,
}

/// Write half of a set-once value.
#[derive(Debug)]
pub struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

/// Read half of a set-once value.
#[derive(Debug)]
pub struct CompletionReader<T> {
    receiver: oneshot::Receiver<T>,
}

pub fn completion<T>() -> (CompletionSlot<T>, CompletionReader<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        CompletionSlot {
            sender: Mutex::new(Some(sender)),
        },
        CompletionReader { receiver },
    )
}

impl<T> CompletionSlot<T> {
    pub fn set(&self, value: T) -> Result<(), CompletionError> {
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or(CompletionError::AlreadyCompleted)?;
        sender
            .send(value)
            .map_err(|_| CompletionError::ReaderDropped)
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<T> CompletionReader<T> {
    /// Waits for the value. Fails once every writer is dropped without writing.
    pub async fn wait(self) -> Result<T, CompletionError> {
        self.receiver.await.map_err(|_| CompletionError::Abandoned)
    }
}

/// Parsed `tools/call` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

pub type BoundValue = Box<dyn Any + Send>;

/// Carries one tool call's request and the slot its handler writes into.
pub struct ExecutionContext {
    request: ToolCallRequest,
    bound: Mutex<HashMap<String, BoundValue>>,
    result: CompletionSlot<ToolOutput>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request", &self.request)
            .field("completed", &self.result.is_completed())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        request: ToolCallRequest,
        bound: HashMap<String, BoundValue>,
    ) -> (Arc<Self>, CompletionReader<ToolOutput>) {
        let (result, reader) = completion();
        let context = Arc::new(Self {
            request,
            bound: Mutex::new(bound),
            result,
        });
        (context, reader)
    }

    /// Takes a converted argument out of the context.
    ///
    /// Returns `None` when the argument was never bound, was already taken, or
    /// was bound to a different type.
    pub fn take_argument<T: 'static>(&self, name: &str) -> Option<T> {
        let mut bound = self.bound.lock();
        let value = bound.remove(name)?;
        match value.downcast::<T>() {
            Ok(typed) => Some(*typed),
            Err(original) => {
                bound.insert(name.to_string(), original);
                None
            }
        }
    }

    pub fn set_result(&self, output: impl Into<ToolOutput>) -> Result<(), CompletionError> {
        self.result.set(output.into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context_with(bound: HashMap<String, BoundValue>) -> (Arc<ExecutionContext>, CompletionReader<ToolOutput>) {
        ExecutionContext::new(ToolCallRequest::new("echo", Map::new()), bound)
    }

    #[tokio::test]
    async fn second_write_is_rejected() {
        let (slot, reader) = completion::<u32>();
        slot.set(1).expect("first write");
        assert!(slot.is_completed());
        assert_eq!(slot.set(2), Err(CompletionError::AlreadyCompleted));
        assert_eq!(reader.wait().await, Ok(1));
    }

    #[test]
    fn write_after_reader_dropped_is_reported() {
        let (slot, reader) = completion::<u32>();
        drop(reader);
        assert_eq!(slot.set(1), Err(CompletionError::ReaderDropped));
    }

    #[tokio::test]
    async fn dropped_writer_abandons_reader() {
        let (slot, reader) = completion::<u32>();
        drop(slot);
        assert_eq!(reader.wait().await, Err(CompletionError::Abandoned));
    }

    #[tokio::test]
    async fn reader_waits_for_late_write() {
        let (context, reader) = context_with(HashMap::new());
        let writer = Arc::clone(&context);
        drop(context);

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.set_result(json!("late")).expect("write");
        });

        let output = reader.wait().await.expect("value");
        assert!(matches!(output, ToolOutput::Value(ref value) if value == &json!("late")));
    }

    #[test]
    fn take_argument_downcasts_once() {
        let mut bound: HashMap<String, BoundValue> = HashMap::new();
        bound.insert("text".to_string(), Box::new("hi".to_string()));
        let (context, _reader) = context_with(bound);

        assert_eq!(context.take_argument::<u32>("text"), None);
        assert_eq!(context.take_argument::<String>("text").as_deref(), Some("hi"));
        assert_eq!(context.take_argument::<String>("text"), None);
    }
}
