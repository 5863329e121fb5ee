mod fallback_chain_test;
