//! Child list reconciliation.
//!
//! # How Keyed Diffing Works
//!
//! Given the old and new child lists of one element:
//!
//! 1. Sync from the start: patch pairs while both heads have the same type
//!    and key.
//!
//! 2. Sync from the end the same way.
//!
//! 3. If the old list is used up, mount what is left of the new one in
//!    front of the first already-patched trailing node. If the new list is
//!    used up, unmount what is left of the old one.
//!
//! 4. Otherwise, for the unknown middle:
//!    - index the new children by key,
//!    - walk the old children, find each one's new position (by key, or
//!      for unkeyed children the first unclaimed new child of the same
//!      type), patch it there, and unmount the ones with no position,
//!    - record for each new position which old child filled it. If those
//!      old indices are not increasing, something moved.
//!
//! 5. Walk the new middle backwards, anchoring each node before its
//!    successor. Unfilled positions are mounted. Filled positions move
//!    only when they are not in the longest increasing subsequence of old
//!    indices, which is the largest set of nodes that can stay put.
//!
//! ```text
//! old: a b c d e        new: a c d b f e
//!        └ middle ┘            └ middle ┘
//!
//! new -> old: [c:3, d:4, b:2, f:0]   (old index + 1, 0 = new)
//! LIS:        [c, d]                  (stay)
//! moves:      b before f; f mounted before e
//! ```
//!
//! Lists where no child on either side has a key use the positional
//! fallback: patch the common prefix, then unmount or mount the tail.

use std::collections::HashMap;

use super::host::{HostAdapter, HostId};
use super::patch::Renderer;
use super::vnode::VNode;
use crate::error::Result;
use crate::reactive::Key;

impl<H: HostAdapter + 'static> Renderer<H> {
    pub(crate) fn patch_keyed_children(
        &self,
        old: Vec<VNode>,
        new: &mut [VNode],
        parent: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        let mut old: Vec<Option<VNode>> = old.into_iter().map(Some).collect();
        let mut start = 0;
        let mut old_end = old.len();
        let mut new_end = new.len();

        // 1. common head
        while start < old_end && start < new_end && same_slot(&old[start], &new[start]) {
            self.patch(old[start].take(), &mut new[start], parent, None)?;
            start += 1;
        }

        // 2. common tail
        while start < old_end
            && start < new_end
            && same_slot(&old[old_end - 1], &new[new_end - 1])
        {
            self.patch(old[old_end - 1].take(), &mut new[new_end - 1], parent, None)?;
            old_end -= 1;
            new_end -= 1;
        }

        // 3. only additions or only removals left
        if start >= old_end {
            let anchor = self.anchor_after(new, new_end, anchor);
            for vnode in &mut new[start..new_end] {
                self.mount(vnode, parent, anchor)?;
            }
            return Ok(());
        }
        if start >= new_end {
            for vnode in old[start..old_end].iter_mut().filter_map(Option::take) {
                self.unmount(vnode, true)?;
            }
            return Ok(());
        }

        // 4. unknown middle
        let mut key_to_new: HashMap<Key, usize> = HashMap::new();
        for i in start..new_end {
            let Some(key) = new[i].key.clone() else {
                continue;
            };
            if key_to_new.contains_key(&key) {
                tracing::warn!(%key, "duplicate key among siblings; later ones are remounted");
                continue;
            }
            key_to_new.insert(key, i);
        }

        let to_patch = new_end - start;
        let mut new_to_old = vec![0usize; to_patch];
        let mut patched = 0;
        let mut moved = false;
        let mut max_new_index = 0;

        for old_index in start..old_end {
            let Some(prev) = old[old_index].take() else {
                continue;
            };
            if patched >= to_patch {
                self.unmount(prev, true)?;
                continue;
            }

            let new_index = match &prev.key {
                Some(key) => key_to_new.get(key).copied(),
                None => (start..new_end)
                    .find(|&j| new_to_old[j - start] == 0 && prev.same_type(&new[j])),
            };
            let Some(new_index) = new_index
                .filter(|&j| new_to_old[j - start] == 0 && prev.same_type(&new[j]))
            else {
                self.unmount(prev, true)?;
                continue;
            };

            new_to_old[new_index - start] = old_index + 1;
            if new_index >= max_new_index {
                max_new_index = new_index;
            } else {
                moved = true;
            }
            self.patch(Some(prev), &mut new[new_index], parent, None)?;
            patched += 1;
        }

        // 5. move and mount
        let stable = if moved {
            longest_increasing_subsequence(&new_to_old)
        } else {
            Vec::new()
        };
        let mut stable = stable.iter().rev().peekable();

        for offset in (0..to_patch).rev() {
            let index = start + offset;
            let before = self.anchor_after(new, index + 1, anchor);
            if new_to_old[offset] == 0 {
                self.mount(&mut new[index], parent, before)?;
            } else if moved {
                if stable.peek() == Some(&&offset) {
                    stable.next();
                } else {
                    tracing::trace!(node = %new[index].describe(), "moving child");
                    self.move_node(&new[index], parent, before)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn patch_unkeyed_children(
        &self,
        old: Vec<VNode>,
        new: &mut [VNode],
        parent: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        let common = old.len().min(new.len());
        let mut old = old.into_iter();

        // `new` drives the zip so no surplus old child is pulled and lost.
        for (next, prev) in new.iter_mut().zip(old.by_ref()) {
            self.patch(Some(prev), next, parent, None)?;
        }
        for prev in old {
            self.unmount(prev, true)?;
        }
        for next in &mut new[common..] {
            self.mount(next, parent, anchor)?;
        }
        Ok(())
    }

    /// The host node new children before position `index` are inserted in
    /// front of.
    fn anchor_after(&self, new: &[VNode], index: usize, fallback: Option<HostId>) -> Option<HostId> {
        new.get(index)
            .and_then(|vnode| self.host_el(vnode))
            .or(fallback)
    }
}

fn same_slot(old: &Option<VNode>, new: &VNode) -> bool {
    old.as_ref().is_some_and(|old| old.same_type(new))
}

/// Indices of a longest strictly increasing subsequence of `values`,
/// skipping zeros.
pub(crate) fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    let mut predecessors = vec![0usize; values.len()];
    let mut tails: Vec<usize> = Vec::new();

    for (i, &value) in values.iter().enumerate() {
        if value == 0 {
            continue;
        }
        match tails.last() {
            None => tails.push(i),
            Some(&last) if values[last] < value => {
                predecessors[i] = last;
                tails.push(i);
            }
            Some(_) => {
                let pos = tails.partition_point(|&t| values[t] < value);
                if pos > 0 {
                    predecessors[i] = tails[pos - 1];
                }
                tails[pos] = i;
            }
        }
    }

    let Some(&last) = tails.last() else {
        return tails;
    };
    let mut current = last;
    for slot in tails.iter_mut().rev() {
        *slot = current;
        current = predecessors[current];
    }
    tails
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use crate::render::memory::{HostOp, MemoryHost};
    use crate::render::vnode::{h, text};

    fn list(keys: &[i64]) -> VNode {
        h("ul").children(
            keys.iter()
                .map(|k| Some(h("li").key(*k).child(text(k.to_string())))),
        )
    }

    fn unkeyed(items: &[&str]) -> VNode {
        h("ul").children(items.iter().map(|s| Some(h("li").text(*s))))
    }

    struct Fixture {
        renderer: Renderer<MemoryHost>,
        root: HostId,
    }

    impl Fixture {
        fn new(initial: VNode) -> Self {
            let rt = Runtime::new();
            let renderer = Renderer::new(&rt, MemoryHost::new());
            let root = renderer.host().lock().create_root();
            renderer.render(Some(initial), root).unwrap();
            renderer.host().lock().take_ops();
            Self { renderer, root }
        }

        fn update(&self, next: VNode) -> Vec<HostOp> {
            self.renderer.render(Some(next), self.root).unwrap();
            self.renderer.host().lock().take_ops()
        }

        fn items(&self) -> Vec<HostId> {
            let ul = self.renderer.root(self.root).unwrap();
            self.renderer.host().lock().children(ul)
        }

        fn content(&self) -> String {
            let ul = self.renderer.root(self.root).unwrap();
            self.renderer.host().lock().text_content(ul)
        }
    }

    fn count(ops: &[HostOp], pred: impl Fn(&HostOp) -> bool) -> usize {
        ops.iter().filter(|op| pred(op)).count()
    }

    #[test]
    fn lis_skips_new_entries() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[0, 0]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[3, 1, 2]), vec![1, 2]);
        assert_eq!(longest_increasing_subsequence(&[4, 5, 3, 0]), vec![0, 1]);
        assert_eq!(longest_increasing_subsequence(&[2, 0, 3, 1, 4]), vec![0, 2, 4]);
    }

    #[test]
    fn rotation_moves_one_node() {
        let fx = Fixture::new(list(&[1, 2, 3]));
        let before = fx.items();

        let ops = fx.update(list(&[3, 1, 2]));
        assert_eq!(count(&ops, HostOp::is_create), 0);
        assert_eq!(count(&ops, HostOp::is_remove), 0);
        assert_eq!(
            ops,
            vec![HostOp::Insert {
                node: before[2],
                parent: fx.renderer.root(fx.root).unwrap(),
                anchor: Some(before[0]),
            }]
        );
        assert_eq!(fx.items(), vec![before[2], before[0], before[1]]);
        assert_eq!(fx.content(), "312");
    }

    #[test]
    fn reverse_reuses_every_node() {
        let fx = Fixture::new(list(&[1, 2, 3, 4]));
        let mut before = fx.items();

        let ops = fx.update(list(&[4, 3, 2, 1]));
        assert_eq!(count(&ops, HostOp::is_create), 0);
        assert_eq!(count(&ops, HostOp::is_remove), 0);
        before.reverse();
        assert_eq!(fx.items(), before);
    }

    #[test]
    fn mixed_insert_remove_and_move() {
        let fx = Fixture::new(list(&[1, 2, 3, 4, 5]));
        let before = fx.items();

        let ops = fx.update(list(&[1, 3, 4, 2, 6, 5]));
        assert_eq!(fx.content(), "134265");
        assert_eq!(count(&ops, HostOp::is_remove), 0);
        // li and its text
        assert_eq!(count(&ops, HostOp::is_create), 2);

        let after = fx.items();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[2]);
        assert_eq!(after[3], before[1]);
        assert_eq!(after[5], before[4]);
    }

    #[test]
    fn removed_keys_are_unmounted() {
        let fx = Fixture::new(list(&[1, 2, 3, 4]));
        let before = fx.items();

        let ops = fx.update(list(&[4, 1]));
        assert_eq!(fx.content(), "41");
        assert_eq!(fx.items(), vec![before[3], before[0]]);
        assert_eq!(count(&ops, HostOp::is_remove), 2);
        assert_eq!(count(&ops, HostOp::is_create), 0);
    }

    #[test]
    fn additions_go_before_the_common_tail() {
        let fx = Fixture::new(list(&[1, 4]));
        fx.update(list(&[1, 2, 3, 4]));
        assert_eq!(fx.content(), "1234");

        fx.update(list(&[0, 1, 2, 3, 4]));
        assert_eq!(fx.content(), "01234");
    }

    #[test]
    fn duplicate_keys_leave_no_orphans() {
        let fx = Fixture::new(list(&[1, 1, 3]));

        let ops = fx.update(list(&[3, 1, 1]));
        assert_eq!(fx.items().len(), 3);
        assert_eq!(fx.content(), "311");
        assert_eq!(count(&ops, HostOp::is_remove), 1);
    }

    #[test]
    fn unkeyed_tail_changes() {
        let fx = Fixture::new(unkeyed(&["a", "b"]));
        let before = fx.items();

        let ops = fx.update(unkeyed(&["a", "b", "c"]));
        assert_eq!(fx.items()[..2], before[..]);
        assert_eq!(count(&ops, HostOp::is_create), 1);

        let ops = fx.update(unkeyed(&["x"]));
        assert_eq!(fx.items(), vec![before[0]]);
        assert_eq!(count(&ops, HostOp::is_remove), 2);
        assert_eq!(fx.content(), "x");
    }
}
