//! A module containing few debug utilities.
//!
//! In general, they are meant for debugging the *trie itself*, but it is exposed as potentially
//! useful.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard};

use super::{rf, Branch, MainKind, MainNode, Raw, RootFlags};
use crate::subscriber::Subscriber;

impl<S> Raw<S>
where
    S: Subscriber,
{
    // Hack: &mut to make sure it is not shared between threads and nobody is modifying the
    // thing right now.
    /// Panics if the trie is not in a consistent, settled state.
    ///
    /// Settled means: no root swap in flight, no pending or failed GCAS publication anywhere,
    /// no published empty branch. Tombstones are fine ‒ they linger by design until the next
    /// mutator passes by ‒ and so are empty non-root levels, which compression can leave
    /// behind when it drops the last branch of a parent.
    #[cfg(test)]
    pub(crate) fn assert_clean(&mut self) {
        fn check_main<S: Subscriber>(main: &MainNode<S>, is_root: bool) {
            // Unprotected is fine, we are &mut so nobody else is allowed to touch us now.
            let pin = unsafe { epoch::unprotected() };
            let prev = main.prev.load(Ordering::Relaxed, pin);
            assert!(prev.is_null(), "A pending publication survived its operation");
            match &main.kind {
                MainKind::C(cnode) => {
                    for (word, branch) in &cnode.branches {
                        assert!(
                            !branch.is_empty(),
                            "Empty branch published under {:?}",
                            word
                        );
                        if let Some(child) = &branch.inode {
                            let sub = child.main.load(Ordering::Relaxed, pin);
                            check_main(unsafe { sub.deref() }, false);
                        }
                    }
                }
                MainKind::Tomb => assert!(!is_root, "The root must never be tombstoned"),
                MainKind::Failed => panic!("A failed marker escaped its prev pointer"),
            }
        }

        let pin = unsafe { epoch::unprotected() };
        let root = self.root.load(Ordering::Relaxed, pin);
        assert!(
            !rf(root).contains(RootFlags::DESCRIPTOR),
            "A root swap survived its snapshot"
        );
        let main = unsafe { root.deref() }.main.load(Ordering::Relaxed, pin);
        check_main(unsafe { main.deref() }, true);
    }

    fn print_branch(&self, word: &str, branch: &Branch<S>, fmt: &mut Formatter, pin: &Guard) -> FmtResult {
        write!(fmt, " {}:[", word)?;
        let mut ids: Vec<&str> = branch.subs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        write!(fmt, "{}]", ids.join(","))?;
        if let Some(child) = &branch.inode {
            let main = self.gcas_read(pin, child);
            self.print_main(unsafe { main.deref() }, fmt, pin)?;
        }
        Ok(())
    }

    fn print_main(&self, main: &MainNode<S>, fmt: &mut Formatter, pin: &Guard) -> FmtResult {
        match &main.kind {
            MainKind::C(cnode) => {
                write!(fmt, "(")?;
                let mut words: Vec<&String> = cnode.branches.keys().collect();
                words.sort();
                for word in words {
                    self.print_branch(word, &cnode.branches[word], fmt, pin)?;
                }
                write!(fmt, " )")
            }
            MainKind::Tomb => write!(fmt, "(tomb)"),
            MainKind::Failed => write!(fmt, "(failed)"),
        }
    }

    fn print_shape(&self, fmt: &mut Formatter) -> FmtResult {
        let pin = epoch::pin();
        let root = self.read_root(&pin);
        let main = self.gcas_read(&pin, unsafe { root.deref() });
        self.print_main(unsafe { main.deref() }, fmt, &pin)
    }
}

/// A pretty-printing wrapper around the raw trie.
///
/// The structure ‒ one parenthesised group per level, each branch with its sorted subscriber
/// ids ‒ is printed if this is used to wrap the raw trie.
pub struct PrintShape<'a, S>(pub &'a Raw<S>);

impl<S> Display for PrintShape<'_, S>
where
    S: Subscriber,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        self.0.print_shape(fmt)
    }
}
