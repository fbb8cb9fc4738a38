//! The core implementation of the pattern-matching trie.
//!
//! This module contains the [`Raw`][crate::raw::Raw] type, which is the engine behind the
//! [`Matcher`][crate::Matcher] façade. It is exposed to allow wrapping it into further APIs, but
//! is probably not the best thing for general use.
//!
//! # Structure
//!
//! The trie is a tree of immutable branch maps ([`CNode`]) connected through mutable indirection
//! nodes ([`INode`]). An indirection node is a single atomic pointer to the current *main node*
//! of its level; every mutation allocates a replacement main node and publishes it with a
//! compare-and-swap on that pointer. Readers navigate without any locks and restart when they run
//! into a tombstone left behind by a concurrent removal.
//!
//! Snapshots are O(1) and lazy. The root carries a generation token; taking a snapshot swaps the
//! root for a copy at a fresh generation (the RDCSS dance below) and later mutators re-tag the
//! levels they touch on the way down, copying them on demand. Two protocols cooperate to make
//! this work without blocking anyone:
//!
//! * GCAS ‒ a generation-aware compare-and-swap on an indirection node. The new main node is
//!   published optimistically and then *committed* by clearing its `prev` pointer, but only if
//!   the root generation still matches the node's. When a snapshot won the race, the publication
//!   is marked failed and rolled back by whoever looks at it next.
//! * RDCSS ‒ a restricted double-compare-single-swap on the root slot. The root is replaced only
//!   if its main node still equals a witness value, which linearizes the snapshot against all
//!   concurrent GCAS commits.
//!
//! # Memory management
//!
//! Everything that is structurally shared between snapshots ‒ branch maps, branches, child
//! indirection nodes, the subscribers themselves ‒ is reference counted. The two kinds of
//! allocation that are reachable from a single place only ‒ the main-node holders of one
//! indirection node, and the root slot contents ‒ are managed by [`crossbeam_epoch`] and retired
//! once a CAS unlinks them. Copying an indirection node to a new generation allocates a fresh
//! holder sharing the branch map behind an [`Arc`], which is what keeps both the retirement
//! sound and the snapshot constant-time.
//!
//! For the lookup semantics see [`Raw::lookup`]; for correctness arguments of the individual
//! steps see the comments in the source (they probably don't belong into API documentation).

use std::collections::HashMap;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use crossbeam_epoch::{self as epoch, Atomic, CompareExchangeError, Guard, Owned, Pointer, Shared};

pub mod debug;

use crate::config::Config;
use crate::subscriber::Subscriber;

bitflags! {
    /// Flags living in the unused low bits of the root pointer.
    ///
    /// The root slot can hold two different types of allocation. Both align to at least a
    /// machine word, so the lowest bit is free to tell them apart.
    struct RootFlags: usize {
        /// The root slot holds an in-progress RDCSS descriptor, not an indirection node.
        const DESCRIPTOR = 0b1;
    }
}

/// Extracts [`RootFlags`] from a root pointer.
fn rf<S>(root: Shared<INode<S>>) -> RootFlags {
    RootFlags::from_bits(root.tag()).expect("Invalid root flags")
}

/// Type-casts the root pointer to the RDCSS descriptor it hides.
unsafe fn load_desc<'a, S>(root: Shared<'a, INode<S>>) -> &'a RdcssDescriptor<S> {
    assert!(
        rf(root).contains(RootFlags::DESCRIPTOR),
        "Tried to load a descriptor from an indirection node pointer"
    );
    (root.as_raw() as usize as *const RdcssDescriptor<S>)
        .as_ref()
        .expect("A null pointer with descriptor flag found")
}

/// Moves a descriptor behind an [`Owned`] pointer, casts it and provides the correct flags.
fn owned_desc<S>(desc: RdcssDescriptor<S>) -> Owned<INode<S>> {
    unsafe {
        Owned::<INode<S>>::from_raw(Box::into_raw(Box::new(desc)) as usize as *mut _)
            .with_tag(RootFlags::DESCRIPTOR.bits())
    }
}

/// Type-casts and drops the root pointer as a descriptor.
unsafe fn drop_desc<S>(root: Shared<INode<S>>) {
    assert!(
        rf(root).contains(RootFlags::DESCRIPTOR),
        "Tried to drop an indirection node pointer as a descriptor"
    );
    drop(Box::from_raw(root.as_raw() as usize as *mut RdcssDescriptor<S>));
}

/// Schedules a descriptor for destruction once all current readers are done with it.
unsafe fn defer_drop_desc<S>(guard: &Guard, root: Shared<INode<S>>) {
    assert!(
        rf(root).contains(RootFlags::DESCRIPTOR),
        "Tried to retire an indirection node pointer as a descriptor"
    );
    let raw = root.as_raw() as usize;
    guard.defer_unchecked(move || drop(Box::from_raw(raw as *mut RdcssDescriptor<S>)));
}

/// A generation token.
///
/// Only the identity matters: two generations are the same iff they are the same allocation
/// (each `Arc` gets its own, the reference counts make sure of that). That makes the
/// comparison a single pointer comparison and leaves no counter to overflow.
pub(crate) struct Gen;

fn new_gen() -> Arc<Gen> {
    Arc::new(Gen)
}

fn same_gen(a: &Arc<Gen>, b: &Arc<Gen>) -> bool {
    Arc::ptr_eq(a, b)
}

/// An indirection node ‒ the only mutable cell in the trie.
///
/// It stays in place while the main nodes under it come and go, which is what lets the CAS on
/// `main` stand in for locking the whole level.
pub(crate) struct INode<S> {
    main: Atomic<MainNode<S>>,
    gen: Arc<Gen>,
}

impl<S> INode<S> {
    fn new(cnode: CNode<S>, gen: &Arc<Gen>) -> Self {
        INode {
            main: Atomic::new(MainNode {
                kind: MainKind::C(Arc::new(cnode)),
                prev: Atomic::null(),
            }),
            gen: Arc::clone(gen),
        }
    }
}

impl<S> Drop for INode<S> {
    fn drop(&mut self) {
        // The last owner is going away, so nobody can reach the main holder through us any
        // more. GCAS resolves `prev` chains before the operation that created them returns, so
        // the current holder is the only allocation left to free; everything shared below it is
        // reference counted and follows on its own.
        let main = mem::replace(&mut self.main, Atomic::null());
        drop(unsafe { main.into_owned() });
    }
}

/// The payload variants of a main node.
enum MainKind<S> {
    /// A live level: the immutable branch map.
    C(Arc<CNode<S>>),
    /// A tombstone. The level became empty and waits for the parent to compress it away.
    Tomb,
    /// The GCAS rollback sentinel. Appears only inside `prev` pointers.
    Failed,
}

// Manual impl, the derive would insist on S: Clone.
impl<S> Clone for MainKind<S> {
    fn clone(&self) -> Self {
        match self {
            MainKind::C(cnode) => MainKind::C(Arc::clone(cnode)),
            MainKind::Tomb => MainKind::Tomb,
            MainKind::Failed => MainKind::Failed,
        }
    }
}

/// One published value of an indirection node.
///
/// The holder itself belongs to exactly one indirection node (copying a node to a new
/// generation allocates a fresh holder around the shared payload), so whoever unlinks it with a
/// successful CAS may also retire it.
pub(crate) struct MainNode<S> {
    kind: MainKind<S>,
    /// GCAS scaffolding. Null once the value is committed; the displaced main node while the
    /// publication is still pending; a `Failed` marker when it lost against a snapshot.
    prev: Atomic<MainNode<S>>,
}

impl<S> MainNode<S> {
    fn cnode(cnode: CNode<S>) -> Owned<Self> {
        Owned::new(MainNode {
            kind: MainKind::C(Arc::new(cnode)),
            prev: Atomic::null(),
        })
    }

    fn tomb() -> Owned<Self> {
        Owned::new(MainNode {
            kind: MainKind::Tomb,
            prev: Atomic::null(),
        })
    }

    fn failed(prev: Shared<'_, MainNode<S>>) -> Owned<Self> {
        Owned::new(MainNode {
            kind: MainKind::Failed,
            prev: Atomic::from(prev),
        })
    }
}

impl<S> Drop for MainNode<S> {
    fn drop(&mut self) {
        // A failed marker only borrows its rollback target, it owns nothing. Any other holder
        // owns at most an attached marker ‒ a rollback unlinks the replacement together with
        // it. A non-failed predecessor is never ours to free: it either became null on commit
        // or lives on as the indirection node's main after the rollback.
        if let MainKind::Failed = self.kind {
            return;
        }
        let prev = mem::replace(&mut self.prev, Atomic::null());
        // Unprotected: we are being destroyed, nobody can reach us (or through us) any more.
        let prev = unsafe { prev.load(Ordering::Relaxed, epoch::unprotected()) };
        if !prev.is_null() {
            if let MainKind::Failed = unsafe { prev.deref() }.kind {
                drop(unsafe { prev.into_owned() });
            }
        }
    }
}

/// One level of the trie: an immutable mapping from word to branch.
///
/// Never modified in place; every update copies the map. The branches themselves are shared
/// between the copies, so an update is O(width of the level), not O(subtree).
pub(crate) struct CNode<S> {
    branches: HashMap<String, Arc<Branch<S>>>,
    gen: Arc<Gen>,
}

/// A single entry of a branch map: the subscribers registered exactly at this word position,
/// plus an optional link extending the path by another level.
pub(crate) struct Branch<S> {
    subs: HashMap<String, Arc<S>>,
    inode: Option<Arc<INode<S>>>,
}

impl<S: Subscriber> Branch<S> {
    /// A branch holding one subscriber and no deeper level.
    fn solo(sub: &Arc<S>) -> Self {
        let mut subs = HashMap::with_capacity(1);
        subs.insert(sub.id().to_owned(), Arc::clone(sub));
        Branch { subs, inode: None }
    }

    /// A branch holding no subscribers, just a deeper level.
    fn child(inode: Arc<INode<S>>) -> Self {
        Branch {
            subs: HashMap::new(),
            inode: Some(inode),
        }
    }

    /// A copy with the subscriber merged in. An already present id keeps its original value.
    fn with_sub(&self, sub: &Arc<S>) -> Self {
        let mut subs = self.subs.clone();
        subs.entry(sub.id().to_owned())
            .or_insert_with(|| Arc::clone(sub));
        Branch {
            subs,
            inode: self.inode.clone(),
        }
    }

    /// A copy with the child link replaced, subscribers untouched.
    fn with_inode(&self, inode: Option<Arc<INode<S>>>) -> Self {
        Branch {
            subs: self.subs.clone(),
            inode,
        }
    }

    /// A copy without the given subscriber id.
    fn without_sub(&self, id: &str) -> Self {
        let mut subs = self.subs.clone();
        subs.remove(id);
        Branch {
            subs,
            inode: self.inode.clone(),
        }
    }

    /// No subscribers and no deeper level ‒ such a branch must never be published.
    fn is_empty(&self) -> bool {
        self.subs.is_empty() && self.inode.is_none()
    }

    /// Adds the subscribers of this branch into the result set, deduplicated by id.
    fn collect_into(&self, found: &mut HashMap<String, Arc<S>>) {
        for (id, sub) in &self.subs {
            found.entry(id.clone()).or_insert_with(|| Arc::clone(sub));
        }
    }
}

impl<S: Subscriber> CNode<S> {
    fn empty(gen: &Arc<Gen>) -> Self {
        CNode {
            branches: HashMap::new(),
            gen: Arc::clone(gen),
        }
    }

    fn with_branches(branches: HashMap<String, Arc<Branch<S>>>, gen: &Arc<Gen>) -> Self {
        CNode {
            branches,
            gen: Arc::clone(gen),
        }
    }

    /// Builds the chain of single-branch levels covering `keys`, with `sub` at the deepest one.
    fn new_chain(keys: &[&str], sub: &Arc<S>, gen: &Arc<Gen>) -> Self {
        let mut branches = HashMap::with_capacity(1);
        if keys.len() == 1 {
            branches.insert(keys[0].to_owned(), Arc::new(Branch::solo(sub)));
        } else {
            let child = CNode::new_chain(&keys[1..], sub, gen);
            let inode = Arc::new(INode::new(child, gen));
            branches.insert(keys[0].to_owned(), Arc::new(Branch::child(inode)));
        }
        CNode::with_branches(branches, gen)
    }

    /// A copy with a whole new branch at `keys[0]`, covering the rest of the path.
    ///
    /// Must only be called when the word has no branch yet.
    fn inserted(&self, keys: &[&str], sub: &Arc<S>, gen: &Arc<Gen>) -> Self {
        let mut branches = self.branches.clone();
        let branch = if keys.len() == 1 {
            Branch::solo(sub)
        } else {
            let chain = CNode::new_chain(&keys[1..], sub, gen);
            Branch::child(Arc::new(INode::new(chain, gen)))
        };
        branches.insert(keys[0].to_owned(), Arc::new(branch));
        CNode::with_branches(branches, gen)
    }

    /// A copy with the subscriber merged into the branch at `key`, the child link preserved.
    fn updated(&self, key: &str, sub: &Arc<S>, gen: &Arc<Gen>) -> Self {
        let mut branches = self.branches.clone();
        let branch = match branches.get(key) {
            Some(branch) => branch.with_sub(sub),
            None => Branch::solo(sub),
        };
        branches.insert(key.to_owned(), Arc::new(branch));
        CNode::with_branches(branches, gen)
    }

    /// A copy with the branch at `key` relinked to the given indirection node.
    fn updated_branch(
        &self,
        key: &str,
        inode: Arc<INode<S>>,
        branch: &Branch<S>,
        gen: &Arc<Gen>,
    ) -> Self {
        let mut branches = self.branches.clone();
        branches.insert(key.to_owned(), Arc::new(branch.with_inode(Some(inode))));
        CNode::with_branches(branches, gen)
    }

    /// A copy with the subscriber removed from the branch at `key`. A branch left with neither
    /// subscribers nor a child disappears entirely.
    fn removed(&self, key: &str, id: &str, gen: &Arc<Gen>) -> Self {
        let mut branches = self.branches.clone();
        if let Some(branch) = branches.get(key) {
            let branch = branch.without_sub(id);
            if branch.is_empty() {
                branches.remove(key);
            } else {
                branches.insert(key.to_owned(), Arc::new(branch));
            }
        }
        CNode::with_branches(branches, gen)
    }

    /// A copy with the edge at `key` contracted: the dead child link is dropped and, when no
    /// subscribers sit on the branch either, so is the whole branch.
    fn contracted(&self, key: &str, gen: &Arc<Gen>) -> Self {
        let mut branches = self.branches.clone();
        if let Some(branch) = branches.get(key) {
            if branch.subs.is_empty() {
                branches.remove(key);
            } else {
                branches.insert(key.to_owned(), Arc::new(branch.with_inode(None)));
            }
        }
        CNode::with_branches(branches, gen)
    }

    /// The three branches a lookup must chase at one level: the literal word, the single-word
    /// wildcard and the zero-or-more wildcard. Any of them may be missing.
    fn get_branches(
        &self,
        key: &str,
        config: &Config,
    ) -> (
        Option<&Arc<Branch<S>>>,
        Option<&Arc<Branch<S>>>,
        Option<&Arc<Branch<S>>>,
    ) {
        (
            self.branches.get(key),
            self.branches.get(config.single_wildcard()),
            self.branches.get(config.zero_or_more_wildcard()),
        )
    }
}

/// The verdict of a root swap. Decided exactly once, before the descriptor leaves the slot.
mod verdict {
    pub(super) const UNDECIDED: usize = 0;
    pub(super) const COMMIT: usize = 1;
    pub(super) const ABORT: usize = 2;
}

/// The descriptor of an in-flight root swap.
///
/// Lives behind the [`DESCRIPTOR`][RootFlags::DESCRIPTOR] tag in the root slot while the swap
/// is being decided. Any thread that runs into it settles the swap first, one way or the other,
/// so the slot never stays hostage to the thread that started it.
///
/// The verdict is recorded in the descriptor by a CAS *before* anyone swaps the slot, and all
/// helpers then push the recorded verdict. Deciding through the slot CAS alone (as a collected
/// environment could afford to) would let the original caller read a commit too early as a
/// failure and lose track of who owns the unlinked root.
struct RdcssDescriptor<S> {
    /// The root the swap started from. Borrowed; the slot history owns it.
    old: Atomic<INode<S>>,
    /// The witness: `old`'s main node when the snapshot began. Compared by address only.
    expected: Atomic<MainNode<S>>,
    /// The replacement root. Owned by the descriptor until the swap commits.
    nv: Atomic<INode<S>>,
    decision: AtomicUsize,
}

impl<S> RdcssDescriptor<S> {
    /// Proposes a verdict; the first proposal wins. Returns the verdict in force.
    fn decide(&self, proposed: usize) -> usize {
        match self.decision.compare_exchange(
            verdict::UNDECIDED,
            proposed,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => proposed,
            Err(decided) => decided,
        }
    }
}

impl<S> Drop for RdcssDescriptor<S> {
    fn drop(&mut self) {
        // An uncommitted descriptor still owns its replacement root; a committed one has
        // handed it over to the root slot.
        if self.decision.load(Ordering::Relaxed) != verdict::COMMIT {
            let nv = mem::replace(&mut self.nv, Atomic::null());
            drop(unsafe { nv.into_owned() });
        }
    }
}

/// The raw pattern-matching trie.
///
/// This provides the lock-free core without the convenience layer: patterns and topics come in
/// as plain strings, subscribers are handed around as [`Arc`]s and the read-only discipline of
/// snapshots is asserted rather than typed. It is designed to keep the single implementation of
/// the algorithm in one place and let thin façades adapt it; unless you are building such a
/// façade, [`Matcher`][crate::Matcher] is the type to use.
pub struct Raw<S> {
    root: Atomic<INode<S>>,
    config: Arc<Config>,
    read_only: bool,
}

impl<S: Subscriber> Raw<S> {
    /// Constructs an empty trie with the given configuration.
    pub fn new(config: Config) -> Self {
        let gen = new_gen();
        let root = INode::new(CNode::empty(&gen), &gen);
        Raw {
            root: Atomic::new(root),
            config: Arc::new(config),
            read_only: false,
        }
    }

    fn with_root(root: Atomic<INode<S>>, config: Arc<Config>, read_only: bool) -> Self {
        Raw {
            root,
            config,
            read_only,
        }
    }

    /// Access to the configuration the trie was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether this handle refuses mutations.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn assert_read_write(&self) {
        assert!(!self.read_only, "Cannot modify a read-only snapshot");
    }

    /// Registers the subscriber under the given pattern.
    ///
    /// Runs of consecutive zero-or-more wildcards in the pattern are collapsed to one first.
    /// Subscribing an id that is already present at the pattern is a no-op.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot, or when the pattern is empty.
    pub fn insert(&self, pattern: &str, sub: Arc<S>) {
        self.assert_read_write();
        let words = self.config.split(pattern);
        let keys = self.config.reduce_zero_or_more(words);
        let guard = epoch::pin();
        loop {
            let root = self.read_root(&guard);
            let root = unsafe { root.deref() };
            // The generation we start under. Whenever the trie turns out to have moved to
            // another one mid-descent, the whole operation restarts against the new root.
            let start_gen = Arc::clone(&root.gen);
            if self.iinsert(&guard, root, &keys, &sub, None, &start_gen) {
                return;
            }
        }
    }

    /// Removes the subscriber (by id) from the given pattern.
    ///
    /// Idempotent: removing an id that is not subscribed there is a no-op.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot, or when the pattern is empty.
    pub fn remove(&self, pattern: &str, sub: &S) {
        self.assert_read_write();
        let words = self.config.split(pattern);
        let keys = self.config.reduce_zero_or_more(words);
        let guard = epoch::pin();
        loop {
            let root = self.read_root(&guard);
            let root = unsafe { root.deref() };
            let start_gen = Arc::clone(&root.gen);
            if self.iremove(&guard, root, &keys, sub.id(), None, &start_gen) {
                return;
            }
        }
    }

    /// Finds all subscribers whose patterns match the literal topic.
    ///
    /// The topic is *not* interpreted: a `*` or `#` in it is just a word that happens to look
    /// like a wildcard, and consecutive `#` words are deliberately not collapsed. The result is
    /// deduplicated by subscriber id and comes in no particular order.
    ///
    /// # Panics
    ///
    /// When the topic is empty.
    pub fn lookup(&self, topic: &str) -> Vec<Arc<S>> {
        let keys = self.config.split(topic);
        let guard = epoch::pin();
        let mut found = HashMap::new();
        loop {
            found.clear();
            let root = self.read_root(&guard);
            let root = unsafe { root.deref() };
            let start_gen = Arc::clone(&root.gen);
            if self.ilookup(&guard, root, &keys, None, false, &start_gen, &mut found) {
                return found.into_iter().map(|(_, sub)| sub).collect();
            }
        }
    }

    /// Takes a writable point-in-time snapshot.
    ///
    /// O(1): both this trie and the snapshot move to fresh generations and the structure is
    /// copied lazily, level by level, as either side touches it afterwards.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot.
    pub fn snapshot(&self) -> Raw<S> {
        let guard = epoch::pin();
        loop {
            let root = self.read_root(&guard);
            let root_ref = unsafe { root.deref() };
            let main = self.gcas_read(&guard, root_ref);
            let nv = Owned::new(self.copy_to_gen(&guard, root_ref, new_gen()));
            if self.rdcss_root(&guard, root, main, nv) {
                // The old root is ours now: the swap unlinked it and the copy for the snapshot
                // handle is its last use.
                let snap_root = self.copy_to_gen(&guard, root_ref, new_gen());
                unsafe { guard.defer_destroy(root) };
                return Raw::with_root(Atomic::new(snap_root), Arc::clone(&self.config), false);
            }
        }
    }

    /// Takes a read-only point-in-time snapshot.
    ///
    /// Cheaper than [`snapshot`][Raw::snapshot] (one fresh generation instead of two) and the
    /// result refuses mutation. Must not be called on an already read-only trie ‒ such a trie
    /// *is* its own snapshot, which the façade resolves by handing out another reference.
    pub fn read_only_snapshot(&self) -> Raw<S> {
        assert!(
            !self.read_only,
            "A read-only snapshot is its own snapshot; share the handle instead"
        );
        let guard = epoch::pin();
        loop {
            let root = self.read_root(&guard);
            let root_ref = unsafe { root.deref() };
            let main = self.gcas_read(&guard, root_ref);
            let nv = Owned::new(self.copy_to_gen(&guard, root_ref, new_gen()));
            if self.rdcss_root(&guard, root, main, nv) {
                // The unlinked old root becomes the snapshot's root as is, frozen at its old
                // generation. No mutation can reach it any more: commits only happen under the
                // current generation of the handle they came through, and a read-only handle
                // refuses them outright.
                return Raw::with_root(Atomic::from(root), Arc::clone(&self.config), true);
            }
        }
    }

    /// Lists every pattern that has at least one subscriber, together with its subscribers.
    ///
    /// Walks the current structure; for an atomic listing, call this on a
    /// [read-only snapshot][Raw::read_only_snapshot].
    pub fn subscriptions(&self) -> Vec<(String, Vec<Arc<S>>)> {
        let guard = epoch::pin();
        let root = self.read_root(&guard);
        let main = self.gcas_read(&guard, unsafe { root.deref() });
        let mut out = Vec::new();
        if let MainKind::C(cnode) = &unsafe { main.deref() }.kind {
            for (key, branch) in &cnode.branches {
                self.collect_subscriptions(&guard, key.clone(), branch, &mut out);
            }
        }
        out
    }

    fn collect_subscriptions(
        &self,
        guard: &Guard,
        path: String,
        branch: &Branch<S>,
        out: &mut Vec<(String, Vec<Arc<S>>)>,
    ) {
        if !branch.subs.is_empty() {
            out.push((path.clone(), branch.subs.values().cloned().collect()));
        }
        if let Some(child) = &branch.inode {
            let main = self.gcas_read(guard, child);
            if let MainKind::C(cnode) = &unsafe { main.deref() }.kind {
                for (key, branch) in &cnode.branches {
                    let path = format!("{}{}{}", path, self.config.delimiter(), key);
                    self.collect_subscriptions(guard, path, branch, out);
                }
            }
        }
    }

    /// Lists every word path present in the trie, with or without subscribers.
    ///
    /// Same walking caveat as [`subscriptions`][Raw::subscriptions].
    pub fn topics(&self) -> Vec<String> {
        let guard = epoch::pin();
        let root = self.read_root(&guard);
        let main = self.gcas_read(&guard, unsafe { root.deref() });
        let mut out = Vec::new();
        if let MainKind::C(cnode) = &unsafe { main.deref() }.kind {
            for (key, branch) in &cnode.branches {
                self.collect_topics(&guard, key.clone(), branch, &mut out);
            }
        }
        out
    }

    fn collect_topics(
        &self,
        guard: &Guard,
        path: String,
        branch: &Branch<S>,
        out: &mut Vec<String>,
    ) {
        out.push(path.clone());
        if let Some(child) = &branch.inode {
            let main = self.gcas_read(guard, child);
            if let MainKind::C(cnode) = &unsafe { main.deref() }.kind {
                for (key, branch) in &cnode.branches {
                    let path = format!("{}{}{}", path, self.config.delimiter(), key);
                    self.collect_topics(guard, path, branch, out);
                }
            }
        }
    }

    /// One level of the insertion descent.
    ///
    /// Returns whether the insert linearized; false restarts the whole operation at the root.
    fn iinsert<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        keys: &[&str],
        sub: &Arc<S>,
        parent: Option<&'g INode<S>>,
        start_gen: &Arc<Gen>,
    ) -> bool {
        let main = self.gcas_read(guard, i);
        match &unsafe { main.deref() }.kind {
            MainKind::C(cnode) => match cnode.branches.get(keys[0]) {
                None => {
                    // No branch for the word yet; put a whole new chain there. If the branch
                    // map still carries an older generation, re-tag it in the same go.
                    let ncn = if same_gen(&cnode.gen, &i.gen) {
                        cnode.inserted(keys, sub, &i.gen)
                    } else {
                        self.renewed(guard, cnode, &i.gen).inserted(keys, sub, &i.gen)
                    };
                    self.gcas(guard, i, main, MainNode::cnode(ncn))
                }
                Some(branch) if keys.len() > 1 => {
                    if let Some(child) = &branch.inode {
                        if same_gen(&child.gen, start_gen) {
                            return self.iinsert(guard, child, &keys[1..], sub, Some(i), start_gen);
                        }
                        // The child trails the generation the operation started under. Re-tag
                        // this level and try the same step again; losing the CAS means someone
                        // else moved things along, so start over.
                        let renewed = self.renewed(guard, cnode, start_gen);
                        if self.gcas(guard, i, main, MainNode::cnode(renewed)) {
                            return self.iinsert(guard, i, keys, sub, parent, start_gen);
                        }
                        return false;
                    }
                    // The branch ends here but our pattern goes deeper: grow a chain under it.
                    let chain = CNode::new_chain(&keys[1..], sub, &i.gen);
                    let inode = Arc::new(INode::new(chain, &i.gen));
                    let ncn = if same_gen(&cnode.gen, &i.gen) {
                        cnode.updated_branch(keys[0], inode, branch, &i.gen)
                    } else {
                        self.renewed(guard, cnode, &i.gen)
                            .updated_branch(keys[0], inode, branch, &i.gen)
                    };
                    self.gcas(guard, i, main, MainNode::cnode(ncn))
                }
                Some(branch) => {
                    if branch.subs.contains_key(sub.id()) {
                        // Subscribing twice is a no-op, not an update.
                        return true;
                    }
                    let ncn = cnode.updated(keys[0], sub, &i.gen);
                    self.gcas(guard, i, main, MainNode::cnode(ncn))
                }
            },
            MainKind::Tomb => {
                // Ran into a level torn down by a concurrent removal. Compress it away in the
                // parent and restart.
                if let Some(parent) = parent {
                    self.clean(guard, parent);
                }
                false
            }
            MainKind::Failed => unreachable!("A failed main node leaked out of GCAS"),
        }
    }

    /// One level of the removal descent. Same restart contract as [`iinsert`][Raw::iinsert].
    fn iremove<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        keys: &[&str],
        id: &str,
        parent: Option<&'g INode<S>>,
        start_gen: &Arc<Gen>,
    ) -> bool {
        let main = self.gcas_read(guard, i);
        match &unsafe { main.deref() }.kind {
            MainKind::C(cnode) => {
                let branch = match cnode.branches.get(keys[0]) {
                    Some(branch) => branch,
                    // Nothing subscribed along this path, nothing to do.
                    None => return true,
                };
                if keys.len() > 1 {
                    if let Some(child) = &branch.inode {
                        if same_gen(&child.gen, start_gen) {
                            return self.iremove(guard, child, &keys[1..], id, Some(i), start_gen);
                        }
                        let renewed = self.renewed(guard, cnode, start_gen);
                        if self.gcas(guard, i, main, MainNode::cnode(renewed)) {
                            return self.iremove(guard, i, keys, id, parent, start_gen);
                        }
                        return false;
                    }
                    return true;
                }
                if !branch.subs.contains_key(id) {
                    return true;
                }
                let ncn = cnode.removed(keys[0], id, &i.gen);
                // A non-root level left empty turns into a tombstone; the parent edge is then
                // contracted right away when possible, or lazily by whoever passes by next.
                let contract = ncn.branches.is_empty() && parent.is_some();
                let nm = if contract {
                    MainNode::tomb()
                } else {
                    MainNode::cnode(ncn)
                };
                if self.gcas(guard, i, main, nm) {
                    if contract {
                        if let Some(parent) = parent {
                            self.clean_parent(guard, parent, i, keys[0], start_gen);
                        }
                    }
                    return true;
                }
                false
            }
            MainKind::Tomb => {
                if let Some(parent) = parent {
                    self.clean(guard, parent);
                }
                false
            }
            MainKind::Failed => unreachable!("A failed main node leaked out of GCAS"),
        }
    }

    /// One level of the matching descent.
    ///
    /// `zero_or_more` says a zero-or-more wildcard one level up is still allowed to swallow
    /// words at this position. Matches are accumulated into `found`, deduplicated by id;
    /// returning false restarts the whole lookup.
    #[allow(clippy::too_many_arguments)]
    fn ilookup<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        keys: &[&str],
        parent: Option<&'g INode<S>>,
        zero_or_more: bool,
        start_gen: &Arc<Gen>,
        found: &mut HashMap<String, Arc<S>>,
    ) -> bool {
        let main = self.gcas_read(guard, i);
        match &unsafe { main.deref() }.kind {
            MainKind::C(cnode) => {
                let (exact, single, zom) = cnode.get_branches(keys[0], &self.config);
                if exact.is_none() && single.is_none() && zom.is_none() {
                    // Nothing here matches the word. An active zero-or-more match may still
                    // swallow it and retry the rest of the topic at this very level.
                    if zero_or_more && keys.len() > 1 {
                        return self.ilookup(guard, i, &keys[1..], parent, true, start_gen, found);
                    }
                    return true;
                }
                for &(branch, use_zero) in &[(exact, false), (single, false), (zom, true)] {
                    if let Some(branch) = branch {
                        if !self.blookup(
                            guard, i, parent, main, branch, keys, use_zero, start_gen, found,
                        ) {
                            return false;
                        }
                    }
                }
                true
            }
            MainKind::Tomb => {
                // A tombstone is an empty subtree. A writable trie compresses it away and
                // retries; a read-only snapshot has it frozen in place forever, so retrying
                // would spin ‒ there is nothing down there to find anyway.
                if self.read_only {
                    return true;
                }
                if let Some(parent) = parent {
                    self.clean(guard, parent);
                }
                false
            }
            MainKind::Failed => unreachable!("A failed main node leaked out of GCAS"),
        }
    }

    /// Follows one matched branch of a level.
    ///
    /// `zero_or_more` marks the zero-or-more wildcard branch itself, which may keep swallowing
    /// words without moving in the trie ‒ the self-loop of the wildcard.
    #[allow(clippy::too_many_arguments)]
    fn blookup<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        parent: Option<&'g INode<S>>,
        main: Shared<'g, MainNode<S>>,
        branch: &'g Branch<S>,
        keys: &[&str],
        zero_or_more: bool,
        start_gen: &Arc<Gen>,
        found: &mut HashMap<String, Arc<S>>,
    ) -> bool {
        let mut keys = keys;
        loop {
            if keys.len() > 1 {
                let child = match &branch.inode {
                    Some(child) => child,
                    None if zero_or_more => {
                        // The wildcard swallows the word and stays on this branch. Terminates:
                        // the keys shrink towards the terminal case below.
                        keys = &keys[1..];
                        continue;
                    }
                    // The topic goes deeper than any pattern along this branch.
                    None => return true,
                };
                if self.read_only || same_gen(&child.gen, start_gen) {
                    return self.ilookup(
                        guard,
                        child,
                        &keys[1..],
                        Some(i),
                        zero_or_more,
                        start_gen,
                        found,
                    );
                }
                // A writable trie whose level trails the current generation: re-tag it first,
                // the same way the mutations do.
                let renewed = match &unsafe { main.deref() }.kind {
                    MainKind::C(cnode) => self.renewed(guard, cnode, start_gen),
                    _ => unreachable!("Branch lookup on a non-branch main node"),
                };
                if self.gcas(guard, i, main, MainNode::cnode(renewed)) {
                    return self.ilookup(guard, i, keys, parent, zero_or_more, start_gen, found);
                }
                return false;
            }

            // Terminal word of the topic.
            branch.collect_into(found);
            if let Some(child) = &branch.inode {
                let child_main = self.gcas_read(guard, child);
                if let MainKind::C(child_cnode) = &unsafe { child_main.deref() }.kind {
                    // A pattern continuing with a zero-or-more wildcard also matches here, the
                    // wildcard swallowing nothing (`a.#` matches the topic `a`).
                    if let Some(zom) = child_cnode
                        .branches
                        .get(self.config.zero_or_more_wildcard())
                    {
                        zom.collect_into(found);
                    }
                    if zero_or_more {
                        // Inside a wildcard run the word may as well be the one ending it,
                        // matched by whatever the pattern continues with one level deeper.
                        let (exact, single, zom) = child_cnode.get_branches(keys[0], &self.config);
                        for branch in &[exact, single, zom] {
                            if let Some(branch) = branch {
                                branch.collect_into(found);
                            }
                        }
                    }
                }
            }
            return true;
        }
    }

    /// Copies a branch map so that every child indirection node carries the given generation,
    /// cloning trailing children on demand.
    fn renewed(&self, guard: &Guard, cnode: &CNode<S>, gen: &Arc<Gen>) -> CNode<S> {
        let mut branches = HashMap::with_capacity(cnode.branches.len());
        for (key, branch) in &cnode.branches {
            let branch = match &branch.inode {
                Some(child) if !same_gen(&child.gen, gen) => {
                    let copy = Arc::new(self.copy_to_gen(guard, child, Arc::clone(gen)));
                    Arc::new(branch.with_inode(Some(copy)))
                }
                _ => Arc::clone(branch),
            };
            branches.insert(key.clone(), branch);
        }
        CNode::with_branches(branches, gen)
    }

    /// A copy of an indirection node at the given generation, sharing the payload.
    ///
    /// The fresh main holder is what makes the old and the new node independently retirable.
    fn copy_to_gen(&self, guard: &Guard, i: &INode<S>, gen: Arc<Gen>) -> INode<S> {
        let main = self.gcas_read(guard, i);
        let kind = unsafe { main.deref() }.kind.clone();
        INode {
            main: Atomic::new(MainNode {
                kind,
                prev: Atomic::null(),
            }),
            gen,
        }
    }

    /// Compresses away the tombstoned children of a level. A single attempt; when the CAS
    /// loses, whoever won has either done the same or will run into the tombstone again.
    fn clean(&self, guard: &Guard, i: &INode<S>) {
        let main = self.gcas_read(guard, i);
        if let MainKind::C(cnode) = &unsafe { main.deref() }.kind {
            let compressed = self.compressed(guard, cnode, &i.gen);
            let _ = self.gcas(guard, i, main, MainNode::cnode(compressed));
        }
    }

    /// The compressed form: branches whose child turned into a tombstone lose the child link,
    /// and disappear entirely when no subscribers sit on them either.
    fn compressed(&self, guard: &Guard, cnode: &CNode<S>, gen: &Arc<Gen>) -> CNode<S> {
        let mut branches = HashMap::with_capacity(cnode.branches.len());
        for (key, branch) in &cnode.branches {
            let tombed = match &branch.inode {
                Some(child) => {
                    let child_main = self.gcas_read(guard, child);
                    match &unsafe { child_main.deref() }.kind {
                        MainKind::Tomb => true,
                        _ => false,
                    }
                }
                None => false,
            };
            if !tombed {
                branches.insert(key.clone(), Arc::clone(branch));
            } else if !branch.subs.is_empty() {
                branches.insert(key.clone(), Arc::new(branch.with_inode(None)));
            }
            // An empty branch over a tombstone just goes away.
        }
        CNode::with_branches(branches, gen)
    }

    /// Contracts the edge from `parent` to a tombstoned `i`, provided `parent` still points to
    /// it under `key`.
    ///
    /// Retries lost CASes only while the root generation is still the one the removal started
    /// under; once a snapshot intervened, later operations finish the cleanup instead (the
    /// tombstone stays observable and triggers [`clean`][Raw::clean]).
    fn clean_parent(
        &self,
        guard: &Guard,
        parent: &INode<S>,
        i: &INode<S>,
        key: &str,
        start_gen: &Arc<Gen>,
    ) {
        loop {
            let main = self.gcas_read(guard, i);
            let pmain = self.gcas_read(guard, parent);
            let cnode = match &unsafe { pmain.deref() }.kind {
                MainKind::C(cnode) => cnode,
                _ => return,
            };
            let branch = match cnode.branches.get(key) {
                Some(branch) => branch,
                None => return,
            };
            let child = match &branch.inode {
                Some(child) => child,
                None => return,
            };
            if !ptr::eq(child.as_ref(), i) {
                return;
            }
            match &unsafe { main.deref() }.kind {
                MainKind::Tomb => (),
                _ => return,
            }
            let ncn = cnode.contracted(key, &parent.gen);
            if self.gcas(guard, parent, pmain, MainNode::cnode(ncn)) {
                return;
            }
            let root = self.read_root(guard);
            if !same_gen(&unsafe { root.deref() }.gen, start_gen) {
                return;
            }
        }
    }

    /// Generation-aware compare-and-swap of an indirection node's main node.
    ///
    /// The replacement is published optimistically with `prev` pointing at the displaced value
    /// and then committed ‒ or rolled back, when a snapshot moved the root generation in the
    /// meantime ‒ by [`gcas_complete`][Raw::gcas_complete]. Returns whether the new value ended
    /// up committed.
    fn gcas<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        old: Shared<'g, MainNode<S>>,
        new: Owned<MainNode<S>>,
    ) -> bool {
        // Not shared yet, so the store cannot race with anything.
        new.prev.store(old, Ordering::Relaxed);
        match i
            .main
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst, guard)
        {
            Ok(new) => {
                self.gcas_complete(guard, i, new);
                unsafe { new.deref() }
                    .prev
                    .load(Ordering::Acquire, guard)
                    .is_null()
            }
            // The Err drops the owned replacement. Its `prev` points at the still-live old
            // value, which the destructor knows not to touch.
            Err(_) => false,
        }
    }

    /// Drives a pending GCAS publication on `i` to its verdict and returns the winning main
    /// node.
    ///
    /// Any thread can (and does) run this on publications of other threads. The `prev` field
    /// works as a three-state flag ‒ pending (the displaced value), committed (null) and failed
    /// (a marker wrapping the displaced value) ‒ and every transition is a CAS, so exactly one
    /// helper wins each step.
    fn gcas_complete<'g>(
        &self,
        guard: &'g Guard,
        i: &'g INode<S>,
        mut m: Shared<'g, MainNode<S>>,
    ) -> Shared<'g, MainNode<S>> {
        loop {
            let m_ref = unsafe { m.deref() };
            let prev = m_ref.prev.load(Ordering::SeqCst, guard);
            if prev.is_null() {
                // Already committed.
                return m;
            }
            let prev_ref = unsafe { prev.deref() };
            if let MainKind::Failed = prev_ref.kind {
                // The publication lost against a snapshot; put the displaced value back. The
                // replacement goes away together with its marker, the displaced value lives on.
                let orig = prev_ref.prev.load(Ordering::SeqCst, guard);
                match i
                    .main
                    .compare_exchange(m, orig, Ordering::SeqCst, Ordering::SeqCst, guard)
                {
                    Ok(_) => {
                        unsafe { guard.defer_destroy(m) };
                        return orig;
                    }
                    Err(e) => {
                        m = e.current;
                        continue;
                    }
                }
            }
            // Still pending. The publication may commit only if the root generation still
            // matches the node's ‒ that is the whole point of GCAS. The root read must abort
            // an in-flight RDCSS rather than help it forward, because helping would need a
            // committed read of the old root's main and call right back into here.
            let root = self.rdcss_read_root(guard, true);
            if same_gen(&unsafe { root.deref() }.gen, &i.gen) && !self.read_only {
                // Commit by clearing `prev`. The winner of this CAS also retires the displaced
                // value: it was reachable only through the cleared pointer.
                if m_ref
                    .prev
                    .compare_exchange(
                        prev,
                        Shared::null(),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                        guard,
                    )
                    .is_ok()
                {
                    unsafe { guard.defer_destroy(prev) };
                    return m;
                }
                continue;
            }
            // The generation moved on; flag the publication as failed so the next round ‒ of
            // whoever gets here first ‒ rolls it back. A lost CAS means someone else resolved
            // the flag, one way or the other.
            let _ = m_ref.prev.compare_exchange(
                prev,
                MainNode::failed(prev),
                Ordering::SeqCst,
                Ordering::SeqCst,
                guard,
            );
            m = i.main.load(Ordering::SeqCst, guard);
        }
    }

    /// A committed read of an indirection node's main node.
    ///
    /// Resolves a pending publication first, so the returned value is one that has (or could
    /// have) linearized.
    fn gcas_read<'g>(&self, guard: &'g Guard, i: &'g INode<S>) -> Shared<'g, MainNode<S>> {
        let main = i.main.load(Ordering::SeqCst, guard);
        let prev = unsafe { main.deref() }.prev.load(Ordering::SeqCst, guard);
        if prev.is_null() {
            main
        } else {
            self.gcas_complete(guard, i, main)
        }
    }

    /// The only CAS on the root slot ‒ and the single place, besides the public entry points,
    /// where the read-only discipline needs enforcing.
    ///
    /// The error hands the rejected pointer back: when it is a tagged descriptor, dropping it
    /// as the slot's nominal type would tear the wrong allocation apart.
    #[allow(clippy::type_complexity)]
    fn cas_root<'g, P>(
        &self,
        guard: &'g Guard,
        current: Shared<'g, INode<S>>,
        new: P,
    ) -> Result<Shared<'g, INode<S>>, CompareExchangeError<'g, INode<S>, P>>
    where
        P: Pointer<INode<S>>,
    {
        self.assert_read_write();
        self.root
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst, guard)
    }

    /// Proposes swapping the root from `ov` to `nv`, provided `ov`'s main node still equals
    /// `expected` at the decision point.
    ///
    /// The descriptor is published into the root slot first, so concurrent operations see the
    /// swap in progress and help decide it instead of racing past it.
    fn rdcss_root<'g>(
        &self,
        guard: &'g Guard,
        ov: Shared<'g, INode<S>>,
        expected: Shared<'g, MainNode<S>>,
        nv: Owned<INode<S>>,
    ) -> bool {
        let desc = owned_desc(RdcssDescriptor {
            old: Atomic::from(ov),
            expected: Atomic::from(expected),
            nv: Atomic::from(nv),
            decision: AtomicUsize::new(verdict::UNDECIDED),
        });
        match self.cas_root(guard, ov, desc) {
            Ok(desc) => {
                self.rdcss_complete(guard, false);
                // A helper may have retired the descriptor already, but our pin keeps it
                // readable, and the verdict is always recorded before the slot moves on.
                unsafe { load_desc(desc) }.decision.load(Ordering::Acquire) == verdict::COMMIT
            }
            Err(e) => {
                // Never published; take the descriptor apart again, as what it really is.
                unsafe { drop_desc(e.new.into_shared(guard)) };
                false
            }
        }
    }

    /// Settles an in-flight root swap, forward or backward, and returns the settled root.
    ///
    /// `abort` is used from within GCAS completion: deciding the swap forward needs a committed
    /// read of the old root's main node, which may itself be waiting for that very completion,
    /// so the completion path backs the swap out instead.
    fn rdcss_complete<'g>(&self, guard: &'g Guard, abort: bool) -> Shared<'g, INode<S>> {
        loop {
            let root = self.root.load(Ordering::SeqCst, guard);
            if !rf(root).contains(RootFlags::DESCRIPTOR) {
                return root;
            }
            let desc = unsafe { load_desc(root) };
            let ov = desc.old.load(Ordering::Relaxed, guard);
            let nv = desc.nv.load(Ordering::Relaxed, guard);
            let decided = if abort {
                // Push the swap out of the way without reading anything through GCAS; prefer
                // rollback when the verdict is still open.
                desc.decide(verdict::ABORT)
            } else {
                let expected = desc.expected.load(Ordering::Relaxed, guard);
                let old_main = self.gcas_read(guard, unsafe { ov.deref() });
                if old_main == expected {
                    desc.decide(verdict::COMMIT)
                } else {
                    // Someone published on the old root since the witness was taken.
                    desc.decide(verdict::ABORT)
                }
            };
            // Whatever we proposed, the verdict in force is what everyone pushes now. Whoever
            // wins the slot CAS also owns the descriptor's retirement.
            let target = if decided == verdict::COMMIT { nv } else { ov };
            match self.cas_root(guard, root, target) {
                Ok(_) => {
                    unsafe { defer_drop_desc(guard, root) };
                    return target;
                }
                Err(_) => continue,
            }
        }
    }

    /// Reads the root, settling an in-flight swap first.
    fn rdcss_read_root<'g>(&self, guard: &'g Guard, abort: bool) -> Shared<'g, INode<S>> {
        let root = self.root.load(Ordering::SeqCst, guard);
        if rf(root).contains(RootFlags::DESCRIPTOR) {
            self.rdcss_complete(guard, abort)
        } else {
            root
        }
    }

    fn read_root<'g>(&self, guard: &'g Guard) -> Shared<'g, INode<S>> {
        self.rdcss_read_root(guard, false)
    }
}

impl<S> Drop for Raw<S> {
    fn drop(&mut self) {
        /*
         * Notes about unsafety here:
         * * We are in a destructor taking &mut self, so no operation on this handle is in
         *   flight and nobody new can start one.
         * * A descriptor never outlives the snapshot call that installed it, so the slot holds
         *   a plain indirection node.
         * * The destruction still has to be deferred: a read-only snapshot's root used to be
         *   the root of the trie it was taken from, and an operation on *that* trie may have
         *   picked the pointer up just before the snapshot swap and still be reading under its
         *   pin.
         * * Dropping the root node frees its main holder; everything below is reference
         *   counted and follows on its own, without touching what other snapshots share.
         */
        unsafe {
            let guard = epoch::pin();
            let root = self.root.load(Ordering::Relaxed, &guard);
            assert!(
                !rf(root).contains(RootFlags::DESCRIPTOR),
                "Dropping a trie with a root swap in flight"
            );
            guard.defer_destroy(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str) -> Arc<String> {
        Arc::new(id.to_owned())
    }

    fn trie() -> Raw<String> {
        Raw::new(Config::amqp())
    }

    fn ids(trie: &Raw<String>, topic: &str) -> Vec<String> {
        let mut ids: Vec<String> = trie
            .lookup(topic)
            .iter()
            .map(|sub| sub.as_ref().clone())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn insert_lookup_remove() {
        let trie = trie();
        assert!(trie.lookup("a.b").is_empty());
        trie.insert("a.b", sub("s1"));
        assert_eq!(vec!["s1"], ids(&trie, "a.b"));
        trie.insert("a.b", sub("s1"));
        assert_eq!(vec!["s1"], ids(&trie, "a.b"));
        trie.remove("a.b", &"s1".to_owned());
        assert!(trie.lookup("a.b").is_empty());
        // Removing again is a no-op.
        trie.remove("a.b", &"s1".to_owned());
    }

    /// Contracting a removed level must not take prefix subscribers with it.
    #[test]
    fn contraction_keeps_prefix_subscribers() {
        let mut trie = trie();
        trie.insert("a", sub("shallow"));
        trie.insert("a.b", sub("deep"));
        trie.remove("a.b", &"deep".to_owned());
        eprintln!("{}", debug::PrintShape(&trie));
        // The first lookup may observe the tombstone, compress it away and restart.
        assert!(trie.lookup("a.b").is_empty());
        assert_eq!(vec!["shallow"], ids(&trie, "a"));
        trie.assert_clean();
    }

    /// A tombstone left by a removal is swept up by the next insert passing by.
    #[test]
    fn insert_through_tombstone() {
        let mut trie = trie();
        trie.insert("a.b", sub("s1"));
        trie.remove("a.b", &"s1".to_owned());
        trie.insert("a.b", sub("s2"));
        assert_eq!(vec!["s2"], ids(&trie, "a.b"));
        trie.assert_clean();
    }

    /// The root level is never contracted, even when it empties out.
    #[test]
    fn root_survives_emptying() {
        let mut trie = trie();
        trie.insert("a", sub("s1"));
        trie.remove("a", &"s1".to_owned());
        assert!(trie.lookup("a").is_empty());
        trie.insert("b", sub("s2"));
        assert_eq!(vec!["s2"], ids(&trie, "b"));
        trie.assert_clean();
    }

    /// Mutating after a snapshot re-tags the touched path to the new generation while the
    /// snapshot keeps the old one.
    #[test]
    fn generations_diverge_on_snapshot() {
        let trie = trie();
        trie.insert("a.b", sub("s1"));
        let snap = trie.snapshot();
        trie.insert("a.c", sub("s2"));

        let guard = epoch::pin();
        let root = trie.read_root(&guard);
        let snap_root = snap.read_root(&guard);
        let (root, snap_root) = unsafe { (root.deref(), snap_root.deref()) };
        assert!(!same_gen(&root.gen, &snap_root.gen));

        // The write went to the current generation only.
        assert_eq!(vec!["s2"], ids(&trie, "a.c"));
        assert!(snap.lookup("a.c").is_empty());
        assert_eq!(vec!["s1"], ids(&snap, "a.b"));
    }

    /// A tombstone frozen into a read-only snapshot reads as the empty subtree it is, without
    /// any attempt to clean it up.
    #[test]
    fn read_only_snapshot_over_tombstone() {
        let trie = trie();
        trie.insert("a", sub("s1"));
        trie.insert("a.b", sub("s2"));
        // Leaves a lingering tombstone under `a`; nothing passes by to sweep it.
        trie.remove("a.b", &"s2".to_owned());
        let ro = trie.read_only_snapshot();
        assert!(ro.lookup("a.b").is_empty());
        assert_eq!(vec!["s1"], ids(&ro, "a"));
    }

    /// A writable snapshot over a lingering tombstone heals itself: the lookup renews the
    /// level into its own generation and compresses the tombstone there.
    #[test]
    fn snapshot_over_tombstone_self_heals() {
        let trie = trie();
        trie.insert("a", sub("s1"));
        trie.insert("a.b", sub("s2"));
        trie.remove("a.b", &"s2".to_owned());
        let mut snap = trie.snapshot();
        assert!(snap.lookup("a.b").is_empty());
        assert_eq!(vec!["s1"], ids(&snap, "a"));
        snap.assert_clean();
    }

    /// A read-only snapshot descends through trailing generations without re-tagging them.
    #[test]
    fn read_only_lookup_never_renews() {
        let trie = trie();
        trie.insert("a.b.c", sub("s1"));
        let ro = trie.read_only_snapshot();
        // Push the original a generation further so the snapshot's levels all trail.
        trie.insert("a.b.d", sub("s2"));
        assert_eq!(vec!["s1"], ids(&ro, "a.b.c"));
        assert!(ro.lookup("a.b.d").is_empty());
    }

    #[test]
    fn walks() {
        let trie = trie();
        trie.insert("a", sub("s1"));
        trie.insert("a.b", sub("s2"));
        let mut subscriptions: Vec<String> = trie
            .subscriptions()
            .into_iter()
            .map(|(topic, _)| topic)
            .collect();
        subscriptions.sort();
        assert_eq!(vec!["a", "a.b"], subscriptions);
        let mut topics = trie.topics();
        topics.sort();
        assert_eq!(vec!["a", "a.b"], topics);
    }
}
