use std::cell::RefCell;

/// Navigation capability handed to components.
pub trait History {
    fn push(&self, path: &str);
}

/// Records pushed paths so the request handler can answer with a redirect.
#[derive(Default, Debug)]
pub struct MemoryHistory {
    entries: RefCell<Vec<String>>,
}

impl MemoryHistory {
    pub fn new() -> MemoryHistory {
        MemoryHistory::default()
    }

    pub fn location(&self) -> Option<String> {
        self.entries.borrow().last().cloned()
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

impl History for MemoryHistory {
    fn push(&self, path: &str) {
        self.entries.borrow_mut().push(path.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_push_wins() {
        let history = MemoryHistory::new();
        assert_eq!(history.location(), None);
        history.push("/signup");
        history.push("/login");
        assert_eq!(history.location().as_deref(), Some("/login"));
        assert_eq!(history.entries(), vec!["/signup", "/login"]);
    }
}
