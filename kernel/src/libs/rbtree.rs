//! CFS就绪队列使用的红黑树
//!
//! 树的节点保存在一张按进程槽位预先分配好的节点表里，节点之间的
//! parent/left/right 链接使用 [`NodeId`] 下标表示，而不是裸指针。
//! 节点表的 0 号槽位是全局唯一的哨兵节点 NIL：它永远是黑色，
//! 代表所有的空孩子以及根节点的父节点。
//!
//! 树本身不做任何同步，调用者需要在持有外层 `SpinLock` 的情况下调用
//! 所有会读写树结构的方法。

use core::fmt::{self, Debug};

use alloc::vec::Vec;
use log::{debug, warn};
use system_error::SystemError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// 节点表中的下标
///
/// `NodeId(0)` 是哨兵节点，进程槽位 `slot` 对应 `NodeId(slot + 1)`。
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const NIL: NodeId = NodeId(0);

    #[inline]
    pub const fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// 节点对应的进程槽位，哨兵节点没有槽位
    #[inline]
    pub const fn slot(&self) -> Option<usize> {
        if self.is_nil() {
            None
        } else {
            Some(self.0 - 1)
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// 插入修复时，当前节点所处的情形
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum InsertCase {
    /// 叔叔节点是红色
    RedUncle,
    /// 叔叔是黑色，且当前节点是祖父节点的“内侧”孙子
    InnerChild,
    /// 叔叔是黑色，且当前节点是祖父节点的“外侧”孙子
    OuterChild,
}

/// 删除修复时，兄弟节点所处的情形
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DeleteCase {
    /// x的兄弟w是红色的
    RedSibling,
    /// w是黑色，且w的俩个孩子也都是黑色的
    BlackNephews,
    /// w是黑色，近侧孩子是红色，远侧孩子是黑色
    FarNephewBlack,
    /// w是黑色，远侧孩子是红色
    FarNephewRed,
}

/// [`RBTree::verify`] 发现的红黑树性质破坏
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RBTreeViolation {
    SentinelNotBlack,
    RootNotBlack,
    RootHasParent,
    BrokenParentLink(NodeId),
    RedRedEdge(NodeId),
    BlackHeightMismatch(NodeId),
    OrderViolation(NodeId),
    UnlinkedNodeInTree(NodeId),
    CountMismatch { expected: usize, found: usize },
    MinKeyMismatch { cached: u64, actual: u64 },
}

struct RBTreeNode<V> {
    color: Color,
    left: NodeId,
    right: NodeId,
    parent: NodeId,
    /// 虚拟运行时间，也就是排序的键
    key: u64,
    linked: bool,
    value: V,
}

impl<V: Default> RBTreeNode<V> {
    fn empty() -> Self {
        RBTreeNode {
            color: Color::Black,
            left: NodeId::NIL,
            right: NodeId::NIL,
            parent: NodeId::NIL,
            key: 0,
            linked: false,
            value: V::default(),
        }
    }
}

impl<V: Debug> Debug for RBTreeNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "k:{:?} v:{:?} c:{:?}", self.key, self.value, self.color)
    }
}

/// 以虚拟运行时间为键的红黑树
///
/// 每个进程槽位在节点表里固定占有一个节点，插入/删除只改变节点的链接，
/// 不会分配或释放内存。键相等的节点插入时继续向左子树下降，因此同键
/// 节点中后插入的会先被 [`RBTree::leftmost`] 选中。
pub struct RBTree<V> {
    nodes: Vec<RBTreeNode<V>>,
    root: NodeId,
    len: usize,
    /// 树中最小的键；树为空时保留最后一次的值
    min_key: u64,
}

impl<V: Debug> Debug for RBTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RBTree")
            .field("root", &self.root)
            .field("len", &self.len)
            .field("min_key", &self.min_key)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<V: Default> RBTree<V> {
    /// 创建一棵空树，为 `nr_slots` 个进程槽位预留节点
    pub fn new(nr_slots: usize) -> RBTree<V> {
        let mut nodes = Vec::with_capacity(nr_slots + 1);
        // 0号节点是哨兵
        nodes.resize_with(nr_slots + 1, RBTreeNode::empty);
        RBTree {
            nodes,
            root: NodeId::NIL,
            len: 0,
            min_key: 0,
        }
    }
}

impl<V> RBTree<V> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_nil()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len() - 1
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn nil(&self) -> NodeId {
        NodeId::NIL
    }

    #[inline]
    pub fn min_key(&self) -> u64 {
        self.min_key
    }

    /// 进程槽位到树节点的转换
    pub fn node_of(&self, slot: usize) -> Result<NodeId, SystemError> {
        if slot >= self.capacity() {
            warn!(
                "rbtree: slot {} out of range, capacity = {}",
                slot,
                self.capacity()
            );
            return Err(SystemError::EINVAL);
        }
        Ok(NodeId(slot + 1))
    }

    #[inline]
    fn contains(&self, node: NodeId) -> bool {
        !node.is_nil() && node.0 < self.nodes.len()
    }

    fn check_node(&self, node: NodeId) -> Result<(), SystemError> {
        if !self.contains(node) {
            warn!("rbtree: invalid node {:?}", node);
            return Err(SystemError::EINVAL);
        }
        Ok(())
    }

    pub fn is_linked(&self, node: NodeId) -> bool {
        self.contains(node) && self.nodes[node.0].linked
    }

    pub fn key(&self, node: NodeId) -> Option<u64> {
        if !self.contains(node) {
            return None;
        }
        Some(self.nodes[node.0].key)
    }

    /// 修改节点的键。节点在树中时修改键会破坏有序性，因此只允许对不在树中的节点调用
    pub fn set_key(&mut self, node: NodeId, key: u64) -> Result<(), SystemError> {
        self.check_node(node)?;
        if self.nodes[node.0].linked {
            warn!("rbtree: set_key on linked node {:?}", node);
            return Err(SystemError::EBUSY);
        }
        self.nodes[node.0].key = key;
        Ok(())
    }

    pub fn get(&self, node: NodeId) -> Option<&V> {
        if !self.contains(node) {
            return None;
        }
        Some(&self.nodes[node.0].value)
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut V> {
        if !self.contains(node) {
            return None;
        }
        Some(&mut self.nodes[node.0].value)
    }

    #[inline]
    fn key_of(&self, node: NodeId) -> u64 {
        self.nodes[node.0].key
    }

    #[inline]
    fn color(&self, node: NodeId) -> Color {
        self.nodes[node.0].color
    }

    /// 哨兵永远是黑色，对它的染色请求会被忽略
    #[inline]
    fn set_color(&mut self, node: NodeId, color: Color) {
        if node.is_nil() {
            return;
        }
        self.nodes[node.0].color = color;
    }

    #[inline]
    fn is_red(&self, node: NodeId) -> bool {
        self.color(node) == Color::Red
    }

    #[inline]
    fn is_black(&self, node: NodeId) -> bool {
        self.color(node) == Color::Black
    }

    #[inline]
    fn parent(&self, node: NodeId) -> NodeId {
        self.nodes[node.0].parent
    }

    #[inline]
    fn left(&self, node: NodeId) -> NodeId {
        self.nodes[node.0].left
    }

    #[inline]
    fn right(&self, node: NodeId) -> NodeId {
        self.nodes[node.0].right
    }

    #[inline]
    fn child(&self, node: NodeId, side: Side) -> NodeId {
        match side {
            Side::Left => self.left(node),
            Side::Right => self.right(node),
        }
    }

    /// 删除时哨兵会临时记录它顶替的位置的父节点，所以这里不跳过哨兵
    #[inline]
    fn set_parent(&mut self, node: NodeId, parent: NodeId) {
        self.nodes[node.0].parent = parent;
    }

    #[inline]
    fn set_left(&mut self, node: NodeId, left: NodeId) {
        if node.is_nil() {
            return;
        }
        self.nodes[node.0].left = left;
    }

    #[inline]
    fn set_right(&mut self, node: NodeId, right: NodeId) {
        if node.is_nil() {
            return;
        }
        self.nodes[node.0].right = right;
    }

    /// 节点是它父节点的哪一侧孩子
    #[inline]
    fn side_of(&self, node: NodeId) -> Side {
        if self.left(self.parent(node)) == node {
            Side::Left
        } else {
            Side::Right
        }
    }

    fn reset_sentinel(&mut self) {
        let nil = &mut self.nodes[0];
        nil.parent = NodeId::NIL;
        nil.left = NodeId::NIL;
        nil.right = NodeId::NIL;
        nil.color = Color::Black;
    }

    /*
     * 对红黑树的节点(x)进行左旋转
     *
     * 左旋示意图(对节点x进行左旋)：
     *      px                              px
     *     /                               /
     *    x                               y
     *   /  \      --(左旋)-->           / \                #
     *  lx   y                          x  ry
     *     /   \                       /  \
     *    ly   ry                     lx  ly
     *
     */
    fn left_rotate(&mut self, node: NodeId) {
        let temp = self.right(node);
        debug_assert!(!temp.is_nil(), "left_rotate without right child");

        let temp_left = self.left(temp);
        self.set_right(node, temp_left);
        if !temp_left.is_nil() {
            self.set_parent(temp_left, node);
        }

        let parent = self.parent(node);
        self.set_parent(temp, parent);
        if node == self.root {
            self.root = temp;
        } else if node == self.left(parent) {
            self.set_left(parent, temp);
        } else {
            self.set_right(parent, temp);
        }

        self.set_left(temp, node);
        self.set_parent(node, temp);
    }

    /*
     * 对红黑树的节点(y)进行右旋转
     *
     * 右旋示意图(对节点y进行右旋)：
     *            py                               py
     *           /                                /
     *          y                                x
     *         /  \      --(右旋)-->            /  \                     #
     *        x   ry                           lx   y
     *       / \                                   / \                   #
     *      lx  rx                                rx  ry
     *
     */
    fn right_rotate(&mut self, node: NodeId) {
        let temp = self.left(node);
        debug_assert!(!temp.is_nil(), "right_rotate without left child");

        let temp_right = self.right(temp);
        self.set_left(node, temp_right);
        if !temp_right.is_nil() {
            self.set_parent(temp_right, node);
        }

        let parent = self.parent(node);
        self.set_parent(temp, parent);
        if node == self.root {
            self.root = temp;
        } else if node == self.right(parent) {
            self.set_right(parent, temp);
        } else {
            self.set_left(parent, temp);
        }

        self.set_right(temp, node);
        self.set_parent(node, temp);
    }

    /// 朝 `side` 方向旋转：`Side::Left` 为左旋
    #[inline]
    fn rotate(&mut self, node: NodeId, side: Side) {
        match side {
            Side::Left => self.left_rotate(node),
            Side::Right => self.right_rotate(node),
        }
    }

    /// 从 `node` 开始一直向左走，返回最左边的节点。传入哨兵时原样返回哨兵
    pub fn leftmost(&self, node: NodeId) -> NodeId {
        if node.0 >= self.nodes.len() {
            warn!("rbtree: leftmost on invalid node {:?}", node);
            return NodeId::NIL;
        }
        let mut temp = node;
        while !self.left(temp).is_nil() {
            temp = self.left(temp);
        }
        temp
    }

    /// 虚拟运行时间最小的节点
    #[inline]
    pub fn first(&self) -> Option<NodeId> {
        let first = self.leftmost(self.root);
        if first.is_nil() {
            None
        } else {
            Some(first)
        }
    }

    fn insert_case(&self, node: NodeId) -> InsertCase {
        let parent = self.parent(node);
        let side = self.side_of(parent);
        let uncle = self.child(self.parent(parent), side.opposite());
        if self.is_red(uncle) {
            InsertCase::RedUncle
        } else if self.side_of(node) != side {
            InsertCase::InnerChild
        } else {
            InsertCase::OuterChild
        }
    }

    fn insert_fixup(&mut self, mut node: NodeId) {
        while self.is_red(self.parent(node)) {
            let parent = self.parent(node);
            let gparent = self.parent(parent);
            // 父节点是祖父节点的哪一侧孩子
            let side = self.side_of(parent);

            match self.insert_case(node) {
                InsertCase::RedUncle => {
                    let uncle = self.child(gparent, side.opposite());
                    self.set_color(uncle, Color::Black);
                    self.set_color(parent, Color::Black);
                    self.set_color(gparent, Color::Red);
                    node = gparent;
                }
                InsertCase::InnerChild => {
                    // 转成外侧的情形，下一轮循环处理
                    self.rotate(parent, side);
                    node = parent;
                }
                InsertCase::OuterChild => {
                    self.set_color(parent, Color::Black);
                    self.set_color(gparent, Color::Red);
                    self.rotate(gparent, side.opposite());
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    /// 把节点挂入树中
    ///
    /// ## 返回
    ///
    /// - `EINVAL`：节点不属于这棵树或是哨兵
    /// - `EEXIST`：节点已经在树中
    pub fn insert(&mut self, node: NodeId) -> Result<(), SystemError> {
        self.check_node(node)?;
        if self.nodes[node.0].linked {
            warn!("rbtree: node {:?} is already linked", node);
            return Err(SystemError::EEXIST);
        }

        let key = self.key_of(node);
        let mut parent = NodeId::NIL;
        let mut cursor = self.root;
        while !cursor.is_nil() {
            parent = cursor;
            // 键相等时向左走
            cursor = if key <= self.key_of(cursor) {
                self.left(cursor)
            } else {
                self.right(cursor)
            };
        }

        self.set_parent(node, parent);
        if parent.is_nil() {
            self.root = node;
        } else if key <= self.key_of(parent) {
            self.set_left(parent, node);
        } else {
            self.set_right(parent, node);
        }

        let inserted = &mut self.nodes[node.0];
        inserted.left = NodeId::NIL;
        inserted.right = NodeId::NIL;
        inserted.color = Color::Red;
        inserted.linked = true;

        if self.len == 0 || key < self.min_key {
            self.min_key = key;
        }
        self.len += 1;

        self.insert_fixup(node);
        self.after_update();
        Ok(())
    }

    /// 用以 `new` 为根的子树替换以 `old` 为根的子树
    fn transplant(&mut self, old: NodeId, new: NodeId) {
        let parent = self.parent(old);
        if parent.is_nil() {
            self.root = new;
        } else if old == self.left(parent) {
            self.set_left(parent, new);
        } else {
            self.set_right(parent, new);
        }
        self.set_parent(new, parent);
    }

    fn delete_case(&self, parent: NodeId, side: Side) -> DeleteCase {
        let sibling = self.child(parent, side.opposite());
        if self.is_red(sibling) {
            return DeleteCase::RedSibling;
        }
        let near = self.child(sibling, side);
        let far = self.child(sibling, side.opposite());
        if self.is_black(near) && self.is_black(far) {
            DeleteCase::BlackNephews
        } else if self.is_black(far) {
            DeleteCase::FarNephewBlack
        } else {
            DeleteCase::FarNephewRed
        }
    }

    /// `node` 可能是哨兵，此时它的 parent 指向被删除位置的父节点
    fn delete_fixup(&mut self, mut node: NodeId) {
        while node != self.root && self.is_black(node) {
            let parent = self.parent(node);
            let side = if node == self.left(parent) {
                Side::Left
            } else {
                Side::Right
            };
            let sibling = self.child(parent, side.opposite());

            match self.delete_case(parent, side) {
                DeleteCase::RedSibling => {
                    self.set_color(sibling, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate(parent, side);
                    // 兄弟变为黑色，下一轮重新判断
                }
                DeleteCase::BlackNephews => {
                    self.set_color(sibling, Color::Red);
                    node = parent;
                }
                DeleteCase::FarNephewBlack => {
                    let near = self.child(sibling, side);
                    self.set_color(near, Color::Black);
                    self.set_color(sibling, Color::Red);
                    self.rotate(sibling, side.opposite());
                }
                DeleteCase::FarNephewRed => {
                    let far = self.child(sibling, side.opposite());
                    let parent_color = self.color(parent);
                    self.set_color(sibling, parent_color);
                    self.set_color(parent, Color::Black);
                    self.set_color(far, Color::Black);
                    self.rotate(parent, side);
                    node = self.root;
                }
            }
        }
        self.set_color(node, Color::Black);
    }

    /// 把节点从树中摘下
    ///
    /// ## 返回
    ///
    /// - `EINVAL`：节点不属于这棵树或是哨兵
    /// - `ENOENT`：节点不在树中
    pub fn delete(&mut self, node: NodeId) -> Result<(), SystemError> {
        self.check_node(node)?;
        if !self.nodes[node.0].linked {
            warn!("rbtree: node {:?} is not linked", node);
            return Err(SystemError::ENOENT);
        }

        // 真正从原位置上离开的节点的颜色
        let mut original_color = self.color(node);
        let child;

        if self.left(node).is_nil() {
            child = self.right(node);
            self.transplant(node, child);
        } else if self.right(node).is_nil() {
            child = self.left(node);
            self.transplant(node, child);
        } else {
            // 后继节点取代被删节点的位置，并继承它的颜色
            let replace = self.leftmost(self.right(node));
            original_color = self.color(replace);
            child = self.right(replace);
            if self.parent(replace) == node {
                self.set_parent(child, replace);
            } else {
                self.transplant(replace, child);
                let right = self.right(node);
                self.set_right(replace, right);
                self.set_parent(right, replace);
            }
            self.transplant(node, replace);
            let left = self.left(node);
            self.set_left(replace, left);
            self.set_parent(left, replace);
            let color = self.color(node);
            self.set_color(replace, color);
        }

        if original_color == Color::Black {
            self.delete_fixup(child);
        }
        self.reset_sentinel();

        let removed = &mut self.nodes[node.0];
        removed.parent = NodeId::NIL;
        removed.left = NodeId::NIL;
        removed.right = NodeId::NIL;
        removed.linked = false;
        self.len -= 1;

        // 删除可能使最小值变大，只能重新查找
        if !self.is_empty() {
            self.min_key = self.key_of(self.leftmost(self.root));
        }

        self.after_update();
        Ok(())
    }

    /// 树的高度，空树为0
    pub fn height(&self) -> usize {
        self.height_of(self.root)
    }

    fn height_of(&self, node: NodeId) -> usize {
        if node.is_nil() {
            return 0;
        }
        1 + core::cmp::max(self.height_of(self.left(node)), self.height_of(self.right(node)))
    }

    /// 完整遍历整棵树，检查红黑树的所有性质以及 `len`、`min_key` 的一致性
    ///
    /// ## 返回
    ///
    /// 成功时返回根节点的黑高（不计哨兵）
    pub fn verify(&self) -> Result<usize, RBTreeViolation> {
        if !self.is_black(NodeId::NIL) {
            return Err(RBTreeViolation::SentinelNotBlack);
        }
        if !self.is_black(self.root) {
            return Err(RBTreeViolation::RootNotBlack);
        }
        if !self.root.is_nil() && !self.parent(self.root).is_nil() {
            return Err(RBTreeViolation::RootHasParent);
        }

        let mut found = 0;
        let black_height = self.verify_subtree(self.root, None, None, &mut found)?;
        if found != self.len {
            return Err(RBTreeViolation::CountMismatch {
                expected: self.len,
                found,
            });
        }
        if let Some(first) = self.first() {
            let actual = self.key_of(first);
            if actual != self.min_key {
                return Err(RBTreeViolation::MinKeyMismatch {
                    cached: self.min_key,
                    actual,
                });
            }
        }
        Ok(black_height)
    }

    fn verify_subtree(
        &self,
        node: NodeId,
        low: Option<u64>,
        high: Option<u64>,
        found: &mut usize,
    ) -> Result<usize, RBTreeViolation> {
        if node.is_nil() {
            return Ok(0);
        }
        *found += 1;

        let key = self.key_of(node);
        if low.is_some_and(|low| key < low) || high.is_some_and(|high| key > high) {
            return Err(RBTreeViolation::OrderViolation(node));
        }
        if !self.nodes[node.0].linked {
            return Err(RBTreeViolation::UnlinkedNodeInTree(node));
        }

        let left = self.left(node);
        let right = self.right(node);
        for child in [left, right] {
            if child.is_nil() {
                continue;
            }
            if self.parent(child) != node {
                return Err(RBTreeViolation::BrokenParentLink(child));
            }
            if self.is_red(node) && self.is_red(child) {
                return Err(RBTreeViolation::RedRedEdge(node));
            }
        }

        let left_height = self.verify_subtree(left, low, Some(key), found)?;
        let right_height = self.verify_subtree(right, Some(key), high, found)?;
        if left_height != right_height {
            return Err(RBTreeViolation::BlackHeightMismatch(node));
        }
        Ok(left_height + self.is_black(node) as usize)
    }

    #[cfg(feature = "rbtree_verify")]
    fn after_update(&self) {
        if let Err(violation) = self.verify() {
            log::error!("rbtree: invariant broken: {:?}", violation);
            debug_assert!(false, "rbtree invariant broken: {:?}", violation);
        }
    }

    #[cfg(not(feature = "rbtree_verify"))]
    #[inline(always)]
    fn after_update(&self) {}
}

impl<V: Debug> RBTree<V> {
    fn tree_print(&self, node: NodeId, direction: i32) {
        if node.is_nil() {
            return;
        }
        if direction == 0 {
            debug!("'{:?}' is root node", self.nodes[node.0]);
        } else {
            let direct = if direction == -1 { "left" } else { "right" };
            debug!(
                "{:?} is {:?}'s {:?} child ",
                self.nodes[node.0],
                self.nodes[self.parent(node).0],
                direct
            );
        }
        self.tree_print(self.left(node), -1);
        self.tree_print(self.right(node), 1);
    }

    pub fn print_tree(&self) {
        if self.root.is_nil() {
            debug!("This is a empty tree");
            return;
        }
        debug!("This tree size = {:?}, begin:-------------", self.len());
        self.tree_print(self.root, 0);
        debug!("end--------------------------");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn build(keys: &[u64]) -> (RBTree<usize>, Vec<NodeId>) {
        let mut tree = RBTree::new(keys.len());
        let mut ids = Vec::new();
        for (slot, &key) in keys.iter().enumerate() {
            let node = tree.node_of(slot).unwrap();
            tree.set_key(node, key).unwrap();
            *tree.get_mut(node).unwrap() = slot;
            tree.insert(node).unwrap();
            ids.push(node);
        }
        (tree, ids)
    }

    fn in_order<V>(tree: &RBTree<V>) -> Vec<NodeId> {
        fn walk<V>(tree: &RBTree<V>, node: NodeId, out: &mut Vec<NodeId>) {
            if node.is_nil() {
                return;
            }
            walk(tree, tree.left(node), out);
            out.push(node);
            walk(tree, tree.right(node), out);
        }
        let mut out = Vec::new();
        walk(tree, tree.root(), &mut out);
        out
    }

    fn first_key<V>(tree: &RBTree<V>) -> u64 {
        tree.key(tree.leftmost(tree.root())).unwrap()
    }

    #[test]
    fn test_new_tree_is_empty() {
        let tree: RBTree<()> = RBTree::new(8);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.min_key(), 0);
        assert_eq!(tree.root(), tree.nil());
        assert_eq!(tree.capacity(), 8);
        assert_eq!(tree.first(), None);
        assert_eq!(tree.verify(), Ok(0));
    }

    #[test]
    fn test_leftmost_of_nil_is_nil() {
        let (tree, _) = build(&[3, 1, 2]);
        assert_eq!(tree.leftmost(NodeId::NIL), NodeId::NIL);
        let empty: RBTree<()> = RBTree::new(2);
        assert_eq!(empty.leftmost(empty.root()), NodeId::NIL);
    }

    #[test]
    fn test_slot_projection() {
        let tree: RBTree<()> = RBTree::new(4);
        for slot in 0..4 {
            assert_eq!(tree.node_of(slot).unwrap().slot(), Some(slot));
        }
        assert_eq!(tree.node_of(4), Err(SystemError::EINVAL));
        assert_eq!(NodeId::NIL.slot(), None);
    }

    #[test]
    fn test_scenario_leftmost_after_delete() {
        let (mut tree, ids) = build(&[30, 10, 50, 20, 40]);
        tree.verify().unwrap();
        let first = tree.leftmost(tree.root());
        assert_eq!(first, ids[1]);
        assert_eq!(tree.key(first), Some(10));
        assert_eq!(tree.min_key(), 10);

        tree.delete(first).unwrap();
        tree.verify().unwrap();
        let first = tree.leftmost(tree.root());
        assert_eq!(tree.key(first), Some(20));
        assert_eq!(tree.get(first), Some(&3));
        assert_eq!(tree.min_key(), 20);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_sorted_insert_stays_balanced() {
        let keys: Vec<u64> = (0..1000).collect();
        let (tree, _) = build(&keys);
        tree.verify().unwrap();
        assert_eq!(tree.len(), 1000);
        // 红黑树高度上界 2*log2(n+1)，n = 1000 时约为 19.9
        assert!(tree.height() <= 19, "height = {}", tree.height());
        assert_eq!(first_key(&tree), 0);
    }

    #[test]
    fn test_equal_keys_delete_first_inserted() {
        let (mut tree, ids) = build(&[5, 5, 5]);
        tree.delete(ids[0]).unwrap();
        tree.verify().unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(first_key(&tree), 5);
        let order = in_order(&tree);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&ids[1]) && order.contains(&ids[2]));
    }

    #[test]
    fn test_equal_keys_leave_in_reverse_insertion_order() {
        let (mut tree, ids) = build(&[7; 6]);
        let mut removed = Vec::new();
        while let Some(first) = tree.first() {
            tree.delete(first).unwrap();
            tree.verify().unwrap();
            removed.push(first);
        }
        let expected: Vec<NodeId> = ids.iter().rev().cloned().collect();
        assert_eq!(removed, expected);
    }

    #[test]
    fn test_tie_break_is_reproducible() {
        let keys = [4, 2, 4, 2, 4, 9, 2];
        let pop_all = || {
            let (mut tree, _) = build(&keys);
            let mut order = Vec::new();
            while let Some(first) = tree.first() {
                tree.delete(first).unwrap();
                order.push(first.slot().unwrap());
            }
            order
        };
        let order = pop_all();
        assert_eq!(order, pop_all());
        assert_eq!(order, vec![6, 3, 1, 4, 2, 0, 5]);
    }

    #[test]
    fn test_insert_delete_round_trip() {
        let (tree, _) = build(&[]);
        assert!(tree.is_empty());

        let mut tree: RBTree<()> = RBTree::new(1);
        let node = tree.node_of(0).unwrap();
        tree.set_key(node, 42).unwrap();
        tree.insert(node).unwrap();
        assert_eq!(tree.root(), node);
        assert_eq!(tree.min_key(), 42);
        tree.delete(node).unwrap();
        assert_eq!(tree.root(), tree.nil());
        assert_eq!(tree.len(), 0);
        // 空树保留最后一次的最小值
        assert_eq!(tree.min_key(), 42);
        assert!(!tree.is_linked(node));
        tree.verify().unwrap();

        // 节点可以再次插入
        tree.set_key(node, 7).unwrap();
        tree.insert(node).unwrap();
        assert_eq!(tree.min_key(), 7);
    }

    #[test]
    fn test_random_deletes_keep_invariants() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let keys: Vec<u64> = (0..50).map(|_| rng.gen_range(0..100)).collect();
        let (mut tree, ids) = build(&keys);
        tree.verify().unwrap();

        let mut victims = ids.clone();
        victims.shuffle(&mut rng);
        let mut alive: Vec<NodeId> = ids.clone();
        for &victim in victims.iter().take(25) {
            tree.delete(victim).unwrap();
            alive.retain(|&n| n != victim);
            tree.verify().unwrap();

            let expected_min = alive.iter().map(|&n| tree.key(n).unwrap()).min().unwrap();
            assert_eq!(first_key(&tree), expected_min);
            assert_eq!(tree.min_key(), expected_min);
        }
        assert_eq!(tree.len(), 25);
    }

    #[test]
    fn test_random_interleaving() {
        let mut rng = SmallRng::seed_from_u64(2024);
        let mut tree: RBTree<()> = RBTree::new(200);
        let mut linked = vec![false; 200];

        for _ in 0..5000 {
            let slot = rng.gen_range(0..200);
            let node = tree.node_of(slot).unwrap();
            if linked[slot] {
                tree.delete(node).unwrap();
                linked[slot] = false;
            } else {
                // vruntime 只增不减
                let key = tree.key(node).unwrap() + rng.gen_range(0..50);
                tree.set_key(node, key).unwrap();
                tree.insert(node).unwrap();
                linked[slot] = true;
            }

            let count = linked.iter().filter(|&&l| l).count();
            assert_eq!(tree.len(), count);
            assert_eq!(in_order(&tree).len(), count);
            let scan_min = (0..200)
                .filter(|&s| linked[s])
                .map(|s| tree.key(tree.node_of(s).unwrap()).unwrap())
                .min();
            assert_eq!(tree.first().map(|n| tree.key(n).unwrap()), scan_min);
        }
        tree.verify().unwrap();

        let keys: Vec<u64> = in_order(&tree)
            .iter()
            .map(|&n| tree.key(n).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_descending_insert_then_drain() {
        let keys: Vec<u64> = (0..300).rev().collect();
        let (mut tree, _) = build(&keys);
        tree.verify().unwrap();
        let mut last = 0;
        while let Some(first) = tree.first() {
            let key = tree.key(first).unwrap();
            assert!(key >= last);
            last = key;
            tree.delete(first).unwrap();
        }
        assert_eq!(tree.verify(), Ok(0));
        assert_eq!(tree.min_key(), 299);
    }

    #[test]
    fn test_contract_violations_leave_tree_unchanged() {
        let (mut tree, ids) = build(&[3, 1, 2]);

        assert_eq!(tree.insert(ids[0]), Err(SystemError::EEXIST));
        assert_eq!(tree.set_key(ids[0], 100), Err(SystemError::EBUSY));
        assert_eq!(tree.insert(NodeId::NIL), Err(SystemError::EINVAL));
        assert_eq!(tree.delete(NodeId::NIL), Err(SystemError::EINVAL));
        assert_eq!(tree.delete(NodeId(17)), Err(SystemError::EINVAL));

        tree.delete(ids[1]).unwrap();
        assert_eq!(tree.delete(ids[1]), Err(SystemError::ENOENT));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.key(ids[0]), Some(3));
        assert_ne!(tree.root(), NodeId::NIL);
        tree.verify().unwrap();
    }

    #[test]
    fn test_payload_rides_along() {
        let (mut tree, ids) = build(&[10, 20]);
        *tree.get_mut(ids[1]).unwrap() = 99;
        tree.delete(ids[0]).unwrap();
        assert_eq!(tree.first(), Some(ids[1]));
        assert_eq!(tree.get(ids[1]), Some(&99));
        assert_eq!(tree.get(NodeId::NIL), None);
        assert_eq!(tree.get(NodeId(9)), None);
    }

    #[test]
    fn test_print_tree() {
        let (tree, _) = build(&[2, 1, 3]);
        tree.print_tree();
        let empty: RBTree<usize> = RBTree::new(0);
        empty.print_tree();
        let dbg = format!("{:?}", empty);
        assert!(dbg.contains("len: 0"));
    }
}
