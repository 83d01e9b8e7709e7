//! Graph builders for common test topologies

use framepipe::pipeline::{AnyStage, Graph, NodeId, SourceSettings};

/// Builder for a source followed by a chain of relays.
pub struct ChainBuilder {
    graph: Graph,
    source: NodeId,
    tail: NodeId,
    relays: Vec<NodeId>,
}

impl ChainBuilder {
    pub fn new(name: &str, settings: SourceSettings) -> Self {
        let mut graph = Graph::new(name);
        let source = graph.add_source("src", settings).unwrap();
        Self {
            graph,
            source,
            tail: source,
            relays: Vec::new(),
        }
    }

    /// Append a relay after the current tail.
    pub fn relay(mut self, name: &str, stage: Option<AnyStage>) -> Self {
        let id = self.graph.add_relay(name).unwrap();
        if let Some(stage) = stage {
            self.graph.set_stage(id, stage).unwrap();
        }
        self.graph.attach(self.tail, id).unwrap();
        self.tail = id;
        self.relays.push(id);
        self
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn tail(&self) -> NodeId {
        self.tail
    }

    pub fn relays(&self) -> &[NodeId] {
        &self.relays
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder() {
        let chain = ChainBuilder::new("t", SourceSettings::default())
            .relay("a", None)
            .relay("b", None);
        let tail = chain.tail();
        let graph = chain.build();
        assert_eq!(graph.depth(tail).unwrap(), 2);
        assert_eq!(graph.name_of(tail).unwrap(), "b");
    }
}
