/// How surviving inserted list entries are grouped into insert records.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum InsertCoalescing {
    /// Entries coalesce when adjacent in the final list and issued in
    /// ascending order.
    #[default]
    IssueOrder,
    /// Any run of adjacent inserted entries becomes one record.
    Contiguous,
}

#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    pub insert_coalescing: InsertCoalescing,
    /// Emit a remove for keys that were put and removed within the same
    /// transaction. When `false` such keys produce no output at all.
    pub remove_new_keys: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            insert_coalescing: InsertCoalescing::default(),
            remove_new_keys: true,
        }
    }
}

/// Per-tree configuration handed to [`RootNode::with_config`](crate::RootNode::with_config).
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub optimizer: OptimizerConfig,
    /// Drop server-only keys, nodes and opted-out computed values from
    /// collected change sets.
    pub prune_server_only: bool,
    /// Upper bound on commit rounds triggered by change listeners that keep
    /// mutating the tree.
    pub max_commit_rounds: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            prune_server_only: true,
            max_commit_rounds: 64,
        }
    }
}
