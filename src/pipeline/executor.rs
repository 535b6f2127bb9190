//! Pipeline executor: an ordered chain of nodes driven from the head.
//!
//! Nodes are held upstream-first. Input is pushed into the head node and
//! each node forwards to the next through its sink. Shutdown walks the chain
//! in the same order so every node drains into a downstream node that is
//! still running.

use crate::config::PipelineConfig;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::message::Message;
use crate::pipeline::node::{MessageSink, NodeState};
use crate::pipeline::nodes::{DuplexReadTaggingNode, ModBaseCallerNode};
use crate::runner::{PriorRunner, Runner};
use crate::stats::{merge_prefixed, NamedStats};
use std::sync::Arc;

/// An ordered chain of running nodes.
#[derive(Default)]
pub struct Pipeline {
    /// Upstream-first.
    nodes: Vec<Arc<dyn MessageSink>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Graph building ──

    /// Append a node downstream of every node added so far.
    ///
    /// The caller is responsible for having built the previous node with this
    /// one as its sink.
    pub fn add_node(&mut self, node: Arc<dyn MessageSink>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!("Added node {:?} '{}'", id, node.name());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<dyn MessageSink>> {
        if !id.is_valid() {
            return None;
        }
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names, upstream-first.
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name().to_string()).collect()
    }

    // ── Input ──

    /// Push a message into the head node, blocking while it is full.
    pub fn push_message(&self, msg: Message) -> PipelineResult<()> {
        let head = self
            .nodes
            .first()
            .ok_or_else(|| PipelineError::NotRunning("pipeline has no nodes".into()))?;
        head.push_message(msg)
    }

    // ── Lifecycle ──

    /// Terminate every node, upstream-first, and return the first fatal error.
    ///
    /// Every node is terminated even after one reports an error. A node that
    /// failed only because its sink stopped accepting input is reported after
    /// the downstream failure that caused it.
    pub fn terminate(&self) -> PipelineResult<()> {
        let mut first_error: Option<PipelineError> = None;
        for node in &self.nodes {
            match node.terminate() {
                Ok(()) => tracing::debug!("Node '{}' terminated", node.name()),
                Err(err) => {
                    tracing::warn!("Node '{}' terminated with error: {}", node.name(), err);
                    let replace = match &first_error {
                        None => true,
                        Some(PipelineError::SinkTerminated(_)) => {
                            !matches!(err, PipelineError::SinkTerminated(_))
                        }
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(err);
                    }
                }
            }
        }
        tracing::info!("Pipeline terminated ({} nodes)", self.nodes.len());
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Restart every node, downstream-first, so that no restarted worker
    /// pushes into a node that is not accepting input yet.
    pub fn restart(&self) -> PipelineResult<()> {
        for node in self.nodes.iter().rev() {
            node.restart()?;
        }
        tracing::info!("Pipeline restarted ({} nodes)", self.nodes.len());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.nodes.iter().any(|n| n.state() != NodeState::Stopped)
    }

    /// Every node's stats, keyed `"<node name>.<stat>"`.
    pub fn sample_stats(&self) -> NamedStats {
        let mut stats = NamedStats::new();
        for node in &self.nodes {
            merge_prefixed(&mut stats, node.name(), node.sample_stats());
        }
        stats
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.terminate() {
                tracing::warn!("Pipeline terminated with error on drop: {}", err);
            }
        }
    }
}

/// IDs of the nodes created by [`PipelineBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineNodeIds {
    /// `NodeId::INVALID` when duplex tagging is disabled.
    pub duplex_tagging: NodeId,
    pub modbase_caller: NodeId,
    pub sink: NodeId,
}

/// Builder for the standard read pipeline.
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build the standard pipeline:
    /// ```text
    /// DuplexReadTagging → ModBaseCaller → sink
    /// ```
    /// The tagging node is left out when `pipeline.duplex_tagging` is false.
    pub fn build(
        self,
        runners: Vec<Arc<dyn Runner>>,
        sink: Arc<dyn MessageSink>,
    ) -> PipelineResult<(Pipeline, PipelineNodeIds)> {
        let settings = &self.config.pipeline;

        // Nodes are constructed downstream-first since each needs its sink.
        let modbase: Arc<dyn MessageSink> = Arc::new(ModBaseCallerNode::with_options(
            sink.clone(),
            runners,
            settings.modbase_options(),
        )?);
        let tagging: Option<Arc<dyn MessageSink>> = if settings.duplex_tagging {
            Some(Arc::new(DuplexReadTaggingNode::with_capacity(
                modbase.clone(),
                settings.tagging_queue_capacity,
            )?))
        } else {
            None
        };

        let mut pipeline = Pipeline::new();
        let duplex_tagging = match tagging {
            Some(node) => pipeline.add_node(node),
            None => NodeId::INVALID,
        };
        let modbase_caller = pipeline.add_node(modbase);
        let sink = pipeline.add_node(sink);

        tracing::info!("Pipeline built: {}", pipeline.node_names().join(" -> "));

        let node_ids = PipelineNodeIds {
            duplex_tagging,
            modbase_caller,
            sink,
        };
        Ok((pipeline, node_ids))
    }

    /// Build the standard pipeline with [`PriorRunner`]s made from the config.
    pub fn build_with_prior_runners(
        self,
        sink: Arc<dyn MessageSink>,
    ) -> PipelineResult<(Pipeline, PipelineNodeIds)> {
        let runner = &self.config.runner;
        let runners = (0..runner.runner_count.max(1))
            .map(|_| {
                PriorRunner::new(self.config.callers.clone(), runner.batch_size)
                    .map(|r| Arc::new(r.with_mod_probability(runner.mod_probability)) as Arc<dyn Runner>)
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        self.build(runners, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbase::ModBaseParams;
    use crate::pipeline::nodes::{ChannelSink, NullNode};
    use crate::types::Read;
    use crossbeam_channel::Receiver;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.pipeline.modbase_threads = 2;
        config.pipeline.max_reads = 16;
        config.pipeline.force_timeout_ms = 30_000;
        config.runner.batch_size = 4;
        config.runner.mod_probability = 1.0;
        config.callers = vec![ModBaseParams {
            context_before: 4,
            context_after: 4,
            bases_before: 1,
            bases_after: 1,
            ..ModBaseParams::default()
        }];
        config
    }

    fn build(config: PipelineConfig) -> (Pipeline, PipelineNodeIds, Receiver<Message>) {
        let (sink, rx) = ChannelSink::with_capacity(64);
        let (pipeline, ids) = PipelineBuilder::new(config)
            .build_with_prior_runners(Arc::new(sink))
            .unwrap();
        (pipeline, ids, rx)
    }

    fn read(id: &str, seq: &str) -> Read {
        let len = seq.len();
        Read::new(id, seq).with_signal(vec![1.0; len * 5], vec![1; len])
    }

    #[test]
    fn test_builder_wires_standard_chain() {
        let (pipeline, ids, _rx) = build(small_config());
        assert_eq!(
            pipeline.node_names(),
            vec!["duplex_tagging", "modbase_caller", "channel_sink"]
        );
        assert_eq!(ids.duplex_tagging, NodeId(0));
        assert_eq!(ids.modbase_caller, NodeId(1));
        assert_eq!(ids.sink, NodeId(2));
        assert_eq!(
            pipeline.node(ids.modbase_caller).unwrap().state(),
            NodeState::Running
        );
        pipeline.terminate().unwrap();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_builder_without_tagging() {
        let mut config = small_config();
        config.pipeline.duplex_tagging = false;
        let (pipeline, ids, _rx) = build(config);
        assert!(!ids.duplex_tagging.is_valid());
        assert!(pipeline.node(ids.duplex_tagging).is_none());
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_reads_flow_to_sink_with_calls() {
        let (pipeline, _ids, rx) = build(small_config());
        pipeline
            .push_message(read("r1", "ACGTCGACG").into())
            .unwrap();
        pipeline.terminate().unwrap();

        let out: Vec<_> = rx.try_iter().collect();
        assert_eq!(out.len(), 1);
        let r = out[0].as_read().unwrap();
        assert!(r.is_modbase_complete());
        let probs = r.base_mod_probs();
        // ACmGT: fully modified C at every CpG.
        for pos in [1, 4, 7] {
            assert_eq!(probs[pos * 5 + 1], 0);
            assert_eq!(probs[pos * 5 + 2], 255);
        }
        assert_eq!(r.base_mod_info().unwrap().alphabet, "ACmGT");
    }

    #[test]
    fn test_fatal_error_reported_by_terminate() {
        let (pipeline, _ids, rx) = build(small_config());
        let duplex = Read::new("no-separator", "ACGT").with_duplex(true);
        pipeline.push_message(duplex.into()).unwrap();

        let err = pipeline.terminate().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDuplexId(_)));
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_stats_are_prefixed_by_node() {
        let (pipeline, _ids, _rx) = build(small_config());
        pipeline.push_message(read("r1", "ACGT").into()).unwrap();
        pipeline.terminate().unwrap();

        let stats = pipeline.sample_stats();
        assert_eq!(stats["duplex_tagging.messages_received"], 1.0);
        assert_eq!(stats["modbase_caller.mod_base_reads_pushed"], 1.0);
        assert_eq!(stats["channel_sink.reads_sent"], 1.0);
        assert!(stats.contains_key("modbase_caller.runner_0.batches_called"));
    }

    #[test]
    fn test_restart_accepts_input_again() {
        let (pipeline, _ids, rx) = build(small_config());
        pipeline.push_message(read("a", "ACGA").into()).unwrap();
        pipeline.terminate().unwrap();
        assert!(pipeline.push_message(read("late", "ACGA").into()).is_err());

        pipeline.restart().unwrap();
        pipeline.push_message(read("b", "ACGA").into()).unwrap();
        pipeline.terminate().unwrap();

        let ids: Vec<_> = rx
            .try_iter()
            .filter_map(|m| m.as_read().map(|r| r.read_id.clone()))
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_pipeline_rejects_input() {
        let pipeline = Pipeline::new();
        assert!(matches!(
            pipeline.push_message(read("r", "A").into()),
            Err(PipelineError::NotRunning(_))
        ));
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_manual_chain_with_null_sink() {
        let null: Arc<dyn MessageSink> = Arc::new(NullNode::with_workers(1).unwrap());
        let tagging: Arc<dyn MessageSink> =
            Arc::new(DuplexReadTaggingNode::new(null.clone()).unwrap());

        let mut pipeline = Pipeline::new();
        let head = pipeline.add_node(tagging);
        let tail = pipeline.add_node(null);
        assert!(head < tail);

        for i in 0..10 {
            pipeline
                .push_message(read(&format!("r{i}"), "ACGT").into())
                .unwrap();
        }
        pipeline.terminate().unwrap();
        assert_eq!(pipeline.sample_stats()["null.reads_discarded"], 10.0);
    }
}
