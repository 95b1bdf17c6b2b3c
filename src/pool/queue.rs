//! Pending task queue ordered by priority.

use std::collections::VecDeque;

use super::task::{Task, TaskId};

/// Pending tasks, highest priority at the front, FIFO within a priority.
#[derive(Default)]
pub(crate) struct PendingQueue {
    tasks: VecDeque<Task>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new arrival behind every task of equal or higher priority.
    pub fn push(&mut self, task: Task) {
        let index = self
            .tasks
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(index, task);
    }

    /// Re-insert a retried task ahead of every task of equal priority.
    pub fn push_front(&mut self, task: Task) {
        let index = self
            .tasks
            .iter()
            .position(|queued| queued.priority <= task.priority)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(index, task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.id == id)?;
        self.tasks.remove(index)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{PatternValidation, TaskPayload};
    use crate::pool::task::{Priority, TaskSpec};

    fn task(priority: Priority) -> Task {
        let spec = TaskSpec::new(TaskPayload::Validate(PatternValidation {
            pattern: "a".into(),
            flags: String::new(),
        }))
        .with_priority(priority);
        Task::from_spec(TaskId::new(), spec)
    }

    fn priorities(queue: &mut PendingQueue) -> Vec<Priority> {
        let mut out = Vec::new();
        while let Some(task) = queue.pop() {
            out.push(task.priority);
        }
        out
    }

    #[test]
    fn orders_by_priority_descending() {
        let mut queue = PendingQueue::new();
        queue.push(task(Priority::Low));
        queue.push(task(Priority::Critical));
        queue.push(task(Priority::Medium));
        assert_eq!(
            priorities(&mut queue),
            vec![Priority::Critical, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn equal_priority_keeps_arrival_order() {
        let mut queue = PendingQueue::new();
        let first = task(Priority::Medium);
        let second = task(Priority::Medium);
        let (first_id, second_id) = (first.id, second.id);
        queue.push(first);
        queue.push(second);
        assert_eq!(queue.pop().unwrap().id, first_id);
        assert_eq!(queue.pop().unwrap().id, second_id);
    }

    #[test]
    fn retry_goes_ahead_of_equal_priority_only() {
        let mut queue = PendingQueue::new();
        let high = task(Priority::High);
        let waiting = task(Priority::Medium);
        let retried = task(Priority::Medium);
        let (high_id, waiting_id, retried_id) = (high.id, waiting.id, retried.id);
        queue.push(high);
        queue.push(waiting);
        queue.push_front(retried);

        assert_eq!(queue.pop().unwrap().id, high_id);
        assert_eq!(queue.pop().unwrap().id, retried_id);
        assert_eq!(queue.pop().unwrap().id, waiting_id);
    }

    #[test]
    fn remove_by_id() {
        let mut queue = PendingQueue::new();
        let a = task(Priority::Low);
        let a_id = a.id;
        queue.push(a);
        queue.push(task(Priority::Low));

        assert!(queue.remove(a_id).is_some());
        assert!(queue.remove(a_id).is_none());
        assert_eq!(queue.len(), 1);
    }
}
