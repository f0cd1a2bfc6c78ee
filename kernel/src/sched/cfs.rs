use core::cmp::max;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::{debug, error, info};
use system_error::SystemError;

use crate::libs::{
    rbtree::{NodeId, RBTree},
    spinlock::{SpinLock, SpinLockGuard},
};

use super::{Nice, NPROC};

/// nice值为0时的权重
pub const NICE_0_WEIGHT: u64 = 1024;
/// 调度周期，单位为tick
pub const SCHED_LATENCY: u64 = 48;
/// 最小抢占粒度，单位为tick
pub const SCHED_MIN_GRANULARITY: u64 = 6;
/// 预设的调度延迟任务数量
pub const SCHED_NR_LATENCY: u64 = 8;

/// nice值到权重的映射，相邻两级之间大约有10%的CPU时间差距
const SCHED_PRIO_TO_WEIGHT: [u64; 40] = [
    /* -20 */ 88761, 71755, 56483, 46273, 36291,
    /* -15 */ 29154, 23254, 18705, 14949, 11916,
    /* -10 */ 9548, 7620, 6100, 4904, 3906,
    /*  -5 */ 3121, 2501, 1991, 1586, 1277,
    /*   0 */ 1024, 820, 655, 526, 423,
    /*   5 */ 335, 272, 215, 172, 137,
    /*  10 */ 110, 87, 70, 56, 45,
    /*  15 */ 36, 29, 23, 18, 15,
];

pub const fn nice_to_weight(nice: Nice) -> u64 {
    SCHED_PRIO_TO_WEIGHT[(nice.data() - Nice::MIN) as usize]
}

/// ## 把实际运行时间换算成虚拟运行时间
///
/// vruntime_delta = delta * NICE_0_WEIGHT / weight
pub const fn calculate_delta_fair(delta: u64, weight: u64) -> u64 {
    if weight == NICE_0_WEIGHT {
        return delta;
    }
    ((delta as u128 * NICE_0_WEIGHT as u128) / weight as u128) as u64
}

/// ## 计算调度周期，基本思想是在一个周期内让每个任务都至少运行一次。
pub const fn sched_period(nr_running: u64) -> u64 {
    if nr_running > SCHED_NR_LATENCY {
        // 任务太多时，按最小抢占粒度拉长周期
        nr_running * SCHED_MIN_GRANULARITY
    } else {
        SCHED_LATENCY
    }
}

/// 挂在红黑树节点上的调度信息，红黑树本身不会读取这些字段
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedInfo {
    /// 上一次调度决策时的虚拟运行时间
    pub prev_vruntime: u64,
    /// 本次开始运行的时刻
    pub start_time: u64,
    /// 本次分配到的时间片
    pub timeslice: u64,
    pub nice: Nice,
}

/// 被自旋锁保护的CFS队列
#[derive(Debug)]
pub struct CfsQueueInner {
    tree: RBTree<SchedInfo>,
    /// 队列中所有调度实体的权重之和
    load_weight: u64,
}

impl CfsQueueInner {
    pub fn tree(&self) -> &RBTree<SchedInfo> {
        &self.tree
    }

    pub fn load_weight(&self) -> u64 {
        self.load_weight
    }

    fn weight_of(&self, node: NodeId) -> u64 {
        self.tree
            .get(node)
            .map_or(NICE_0_WEIGHT, |info| nice_to_weight(info.nice))
    }

    fn do_enqueue(&mut self, node: NodeId) -> Result<(), SystemError> {
        self.tree.insert(node)?;
        self.load_weight += self.weight_of(node);
        Ok(())
    }

    fn do_dequeue(&mut self, node: NodeId) -> Result<(), SystemError> {
        self.tree.delete(node)?;
        self.load_weight -= self.weight_of(node);
        Ok(())
    }

    fn info(&self, node: NodeId) -> Result<SchedInfo, SystemError> {
        self.tree.get(node).copied().ok_or(SystemError::EINVAL)
    }

    fn info_mut(&mut self, node: NodeId) -> Result<&mut SchedInfo, SystemError> {
        self.tree.get_mut(node).ok_or(SystemError::EINVAL)
    }

    fn vruntime(&self, node: NodeId) -> Result<u64, SystemError> {
        self.tree.key(node).ok_or(SystemError::EINVAL)
    }

    /// ## 计算调度实体的实际运行时间片大小
    ///
    /// slice = period * weight / total_weight，不在队列中的实体也计入总数
    fn sched_slice(&self, node: NodeId) -> u64 {
        let weight = self.weight_of(node);
        let on_rq = self.tree.is_linked(node);
        let nr_running = self.tree.len() as u64 + (!on_rq) as u64;
        let total_weight = if on_rq {
            self.load_weight
        } else {
            self.load_weight + weight
        };
        max(sched_period(nr_running) * weight / total_weight, 1)
    }
}

/// CFS运行队列
///
/// 所有对红黑树的访问都在 `locked_queue` 的保护下进行。`nr_running` 和
/// `min_vruntime` 在每次修改之后同步一份到原子变量里，不加锁读取时只能
/// 得到一个可能过期的快照。
#[derive(Debug)]
pub struct CfsRunQueue {
    locked_queue: SpinLock<CfsQueueInner>,
    nr_running: AtomicUsize,
    min_vruntime: AtomicU64,
}

impl CfsRunQueue {
    pub fn new(nr_slots: usize) -> CfsRunQueue {
        CfsRunQueue {
            locked_queue: SpinLock::new(CfsQueueInner {
                tree: RBTree::new(nr_slots),
                load_weight: 0,
            }),
            nr_running: AtomicUsize::new(0),
            min_vruntime: AtomicU64::new(0),
        }
    }

    /// 获取队列的锁，用于需要在一次加锁中完成多个操作的场景
    pub fn lock(&self) -> SpinLockGuard<CfsQueueInner> {
        self.locked_queue.lock()
    }

    fn publish(&self, queue: &CfsQueueInner) {
        self.nr_running.store(queue.tree.len(), Ordering::Relaxed);
        self.min_vruntime.store(queue.tree.min_key(), Ordering::Relaxed);
    }

    /// 队列中的调度实体数（快照）
    pub fn nr_running(&self) -> usize {
        self.nr_running.load(Ordering::Relaxed)
    }

    /// 队列中最小的虚拟运行时间（快照）。队列为空时保留最后一次的值
    pub fn min_vruntime(&self) -> u64 {
        self.min_vruntime.load(Ordering::Relaxed)
    }

    /// @brief 将进程加入队列
    pub fn enqueue(&self, slot: usize) -> Result<(), SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        queue.do_enqueue(node)?;
        self.publish(&queue);
        Ok(())
    }

    /// @brief 将进程加入队列，如果它的虚拟运行时间落后于队列的最小值，就把它提到最小值
    ///
    /// 长时间睡眠的进程醒来后不会因为vruntime过小而独占CPU
    pub fn enqueue_reset_vruntime(&self, slot: usize) -> Result<(), SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        if queue.tree.is_linked(node) {
            return Err(SystemError::EEXIST);
        }
        if !queue.tree.is_empty() {
            let min_vruntime = queue.tree.min_key();
            if queue.vruntime(node)? < min_vruntime {
                queue.tree.set_key(node, min_vruntime)?;
            }
        }
        queue.do_enqueue(node)?;
        self.publish(&queue);
        Ok(())
    }

    /// @brief 将进程从队列中移除（阻塞、退出，或者准备以新的vruntime重新入队）
    pub fn dequeue(&self, slot: usize) -> Result<(), SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        queue.do_dequeue(node)?;
        self.publish(&queue);
        Ok(())
    }

    /// 下一个应当运行的进程，不会把它移出队列
    pub fn pick_next(&self) -> Option<usize> {
        let queue = self.locked_queue.lock();
        queue.tree.first()?.slot()
    }

    /// @brief 将虚拟运行时间最小的进程移出队列并返回它的槽位。队列为空时返回None
    pub fn pop_next(&self) -> Option<usize> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.first()?;
        queue.do_dequeue(node).ok()?;
        self.publish(&queue);
        node.slot()
    }

    /// @brief 以新的虚拟运行时间重新入队（主动让出CPU时使用）
    ///
    /// 虚拟运行时间只增不减，传入更小的值会返回 `EINVAL`
    pub fn requeue(&self, slot: usize, vruntime: u64) -> Result<(), SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        if vruntime < queue.vruntime(node)? {
            return Err(SystemError::EINVAL);
        }
        if queue.tree.is_linked(node) {
            queue.do_dequeue(node)?;
        }
        queue.tree.set_key(node, vruntime)?;
        queue.do_enqueue(node)?;
        debug!("cfs: requeue slot {} with vruntime {}", slot, vruntime);
        self.publish(&queue);
        Ok(())
    }

    /// @brief 进程被选中开始运行，记录开始时间并分配时间片
    ///
    /// @return 分配到的时间片
    pub fn dispatch(&self, slot: usize, now: u64) -> Result<u64, SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        if queue.tree.is_linked(node) {
            return Err(SystemError::EBUSY);
        }
        let vruntime = queue.vruntime(node)?;
        let timeslice = queue.sched_slice(node);
        let info = queue.info_mut(node)?;
        info.prev_vruntime = vruntime;
        info.start_time = now;
        info.timeslice = timeslice;
        Ok(timeslice)
    }

    /// @brief 为正在运行的进程累加虚拟运行时间
    ///
    /// 正在运行的进程不在队列中，对队列中的进程调用会返回 `EBUSY`
    ///
    /// @return 更新后的虚拟运行时间
    pub fn charge(&self, slot: usize, now: u64) -> Result<u64, SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        if queue.tree.is_linked(node) {
            return Err(SystemError::EBUSY);
        }
        let info = queue.info(node)?;
        let delta = now.saturating_sub(info.start_time);
        let vruntime = queue
            .vruntime(node)?
            .saturating_add(calculate_delta_fair(delta, nice_to_weight(info.nice)));
        queue.tree.set_key(node, vruntime)?;
        queue.info_mut(node)?.start_time = now;
        Ok(vruntime)
    }

    /// 进程本次分到的时间片是否已经用完
    pub fn slice_expired(&self, slot: usize) -> Result<bool, SystemError> {
        let queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        let info = queue.info(node)?;
        let used = queue.vruntime(node)?.saturating_sub(info.prev_vruntime);
        Ok(used >= calculate_delta_fair(info.timeslice, nice_to_weight(info.nice)))
    }

    /// 修改进程的nice值，进程在队列中时同步更新队列的总权重
    pub fn set_nice(&self, slot: usize, nice: i32) -> Result<(), SystemError> {
        let nice = Nice::new(nice).ok_or(SystemError::EINVAL)?;
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        let old_weight = queue.weight_of(node);
        queue.info_mut(node)?.nice = nice;
        if queue.tree.is_linked(node) {
            queue.load_weight = queue.load_weight - old_weight + nice_to_weight(nice);
        }
        Ok(())
    }

    /// 计算并记录进程的时间片
    pub fn timeslice(&self, slot: usize) -> Result<u64, SystemError> {
        let mut queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        let timeslice = queue.sched_slice(node);
        queue.info_mut(node)?.timeslice = timeslice;
        Ok(timeslice)
    }

    pub fn sched_info(&self, slot: usize) -> Result<SchedInfo, SystemError> {
        let queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        queue.info(node)
    }

    pub fn vruntime(&self, slot: usize) -> Result<u64, SystemError> {
        let queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        queue.vruntime(node)
    }

    pub fn is_queued(&self, slot: usize) -> Result<bool, SystemError> {
        let queue = self.locked_queue.lock();
        let node = queue.tree.node_of(slot)?;
        Ok(queue.tree.is_linked(node))
    }
}

lazy_static! {
    /// 全局的CFS运行队列
    static ref CFS_RUN_QUEUE: CfsRunQueue = CfsRunQueue::new(NPROC);
}

static CFS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// @brief 初始化cfs运行队列，只能调用一次
pub fn sched_cfs_init() -> Result<(), SystemError> {
    if CFS_INITIALIZED.swap(true, Ordering::SeqCst) {
        error!("Try to init CFS run queue twice.");
        return Err(SystemError::EEXIST);
    }
    lazy_static::initialize(&CFS_RUN_QUEUE);
    info!("CFS run queue initialized, nr_slots = {}", NPROC);
    Ok(())
}

/// @brief 获取全局cfs运行队列
#[inline]
pub fn cfs_run_queue() -> &'static CfsRunQueue {
    &CFS_RUN_QUEUE
}
