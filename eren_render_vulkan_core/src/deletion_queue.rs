/// Teardown actions recorded at creation time and replayed newest-first.
///
/// Each closure receives the backend at flush time, so nothing here holds a
/// device reference of its own.
pub struct DeletionQueue<B> {
    deletors: Vec<Box<dyn FnOnce(&B)>>,
}

impl<B> DeletionQueue<B> {
    pub fn new() -> Self {
        Self {
            deletors: Vec::new(),
        }
    }

    pub fn push(&mut self, deletor: impl FnOnce(&B) + 'static) {
        self.deletors.push(Box::new(deletor));
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }

    /// Runs every recorded action in reverse order and leaves the queue empty.
    pub fn flush(&mut self, backend: &B) {
        if !self.deletors.is_empty() {
            log::debug!("Flushing {} deferred destructions", self.deletors.len());
        }
        while let Some(deletor) = self.deletors.pop() {
            deletor(backend);
        }
    }
}

impl<B> Default for DeletionQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Drop for DeletionQueue<B> {
    fn drop(&mut self) {
        if !self.deletors.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending actions; GPU objects leaked",
                self.deletors.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[test]
    fn flushes_in_reverse_order_once() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::<()>::new();

        for i in 0..3 {
            let order = order.clone();
            queue.push(move |_| order.borrow_mut().push(i));
        }
        assert_eq!(queue.len(), 3);

        queue.flush(&());
        queue.flush(&());

        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn closures_receive_the_backend() {
        let mut queue = DeletionQueue::<RefCell<Vec<&'static str>>>::new();
        queue.push(|log| log.borrow_mut().push("pool"));
        queue.push(|log| log.borrow_mut().push("fence"));

        let log = RefCell::new(Vec::new());
        queue.flush(&log);

        assert_eq!(log.into_inner(), vec!["fence", "pool"]);
    }
}
