//! Seeded synthetic clusters for trying the planner out

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use vmplan_core::constraints::{Fence, Spread};
use vmplan_core::{Configuration, Node, PlacementConstraint, TargetStates, VirtualMachine};

const NODE_CPU: u32 = 8;
const NODE_MEMORY: u32 = 16384;
const VM_MEMORY: [u32; 4] = [512, 1024, 2048, 4096];

/// Shape of a synthetic cluster
#[derive(Debug, Clone)]
pub struct ClusterShape {
    pub nodes: usize,
    pub vms: usize,
    pub shutdown: usize,
    pub racks: usize,
    pub spread: usize,
    pub seed: u64,
}

/// A generated planning request
#[derive(Debug)]
pub struct Demo {
    pub source: Configuration,
    pub targets: TargetStates,
    pub constraints: Vec<Arc<dyn PlacementConstraint>>,
    /// VMs that did not fit anywhere and were left waiting
    pub unplaced: usize,
}

impl ClusterShape {
    fn rack_of(&self, node: usize) -> usize {
        node * self.racks.max(1) / self.nodes.max(1)
    }

    pub fn generate(&self) -> Demo {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let racks = self.racks.max(1);
        let nodes: Vec<Node> = (1..=self.nodes)
            .map(|i| Node::new(format!("N{}", i), NODE_CPU, NODE_MEMORY))
            .collect();

        let mut source = Configuration::new();
        for node in &nodes {
            source.add_online(node);
        }

        // rack -> VMs placed in it
        let mut members: Vec<Vec<VirtualMachine>> = vec![Vec::new(); racks];
        let mut unplaced = 0;
        for i in 1..=self.vms {
            let memory = VM_MEMORY[rng.gen_range(0..VM_MEMORY.len())];
            let vm = VirtualMachine::new(format!("VM{}", i), rng.gen_range(1..=2), memory);
            let first = rng.gen_range(0..nodes.len().max(1));
            let host = (0..nodes.len())
                .map(|k| (first + k) % nodes.len())
                .find(|n| {
                    source.free_cpu(&nodes[*n]) >= vm.cpu_consumption as i64
                        && source.free_memory(&nodes[*n]) >= vm.memory_consumption as i64
                });
            match host {
                Some(n) => {
                    source.set_run_on(&vm, &nodes[n]);
                    members[self.rack_of(n)].push(vm);
                }
                None => {
                    source.add_waiting(&vm);
                    unplaced += 1;
                }
            }
        }

        let mut off: Vec<&Node> = nodes.iter().collect();
        off.shuffle(&mut rng);
        off.truncate(self.shutdown.min(nodes.len()));
        let targets = TargetStates::new().off(off).keep(&source);

        let mut constraints: Vec<Arc<dyn PlacementConstraint>> = Vec::new();
        if racks > 1 {
            for (rack, vms) in members.iter().enumerate() {
                let rack_nodes = nodes
                    .iter()
                    .enumerate()
                    .filter(|(n, _)| self.rack_of(*n) == rack)
                    .map(|(_, node)| node);
                if !vms.is_empty() {
                    constraints.push(Arc::new(Fence::new(vms, rack_nodes)));
                }
            }
        }
        if self.spread >= 2 {
            for vms in &members {
                for group in vms.chunks_exact(self.spread) {
                    constraints.push(Arc::new(Spread::new(group)));
                }
            }
        }

        Demo {
            source,
            targets,
            constraints,
            unplaced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplan_core::configuration::Usage;

    fn shape(seed: u64) -> ClusterShape {
        ClusterShape {
            nodes: 6,
            vms: 20,
            shutdown: 2,
            racks: 2,
            spread: 2,
            seed,
        }
    }

    #[test]
    fn test_generated_cluster_is_viable() {
        let demo = shape(7).generate();
        assert!(demo.source.overloaded_nodes(Usage::Consumption).is_empty());
        assert_eq!(demo.source.all_vms().len(), 20);
        assert_eq!(demo.targets.off.len(), 2);
        assert!(demo.targets.check(&demo.source).is_ok());
    }

    #[test]
    fn test_same_seed_same_cluster() {
        let (a, b) = (shape(42).generate(), shape(42).generate());
        assert_eq!(a.source, b.source);
        assert_eq!(a.targets.off, b.targets.off);
        assert_eq!(a.constraints.len(), b.constraints.len());
    }

    #[test]
    fn test_racks_are_fenced() {
        let demo = shape(3).generate();
        let fences = demo
            .constraints
            .iter()
            .filter(|c| c.to_string().starts_with("fence"))
            .count();
        assert_eq!(fences, 2);
    }
}
